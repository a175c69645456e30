// Demonstrates upgrading a plain connection with StartTLS
// before binding, and disconnecting from the server.

use ldapwire::result::Result;
use ldapwire::{Ldap, LdapConnSettings};

fn main() -> Result<()> {
    let settings = LdapConnSettings::new()
        .set_starttls(true)
        .set_no_tls_verify(true);
    let mut ldap = Ldap::with_settings(settings, "ldap://localhost:2389")?;
    let _res = ldap
        .simple_bind("cn=Manager,dc=example,dc=org", "secret")?
        .success()?;
    println!("tls: {}", ldap.has_tls());
    ldap.unbind()
}
