// Demonstrates:
//
// 1. SASL EXTERNAL bind;
// 2. "Who Am I?" Extended operation.
//
// Notice: only works on Unix (uses Unix domain sockets)

use ldapwire::result::Result;
use ldapwire::Ldap;

fn main() -> Result<()> {
    let mut ldap = Ldap::new("ldapi://ldapi")?;
    let _res = ldap.sasl_external_bind()?.success()?;
    println!("{}", ldap.whoami()?);
    ldap.unbind()
}
