// Demonstrates the Add and Modify operations, and Compare
// on the modified attribute.

use ldapwire::result::Result;
use ldapwire::{Ldap, Mod};

fn main() -> Result<()> {
    let mut ldap = Ldap::new("ldap://localhost:2389")?;
    ldap.simple_bind("cn=Manager,dc=example,dc=org", "secret")?
        .success()?;
    let dn = "uid=extra,ou=People,dc=example,dc=org";
    ldap.add(
        dn,
        vec![
            ("objectClass", vec!["inetOrgPerson"]),
            ("uid", vec!["extra"]),
            ("cn", vec!["Extra User"]),
            ("sn", vec!["User"]),
        ],
    )?
    .success()?;
    let res = ldap.modify(
        dn,
        vec![
            Mod::Add("mail", vec!["extra@example.org"]),
            Mod::Replace("sn", vec!["Userson"]),
        ],
    )?;
    println!("{}: {}", res.message(), res.error_message());
    let eq = ldap.compare(dn, "sn", "Userson")?.equal()?;
    println!("{}equal", if eq { "" } else { "not " });
    ldap.delete(dn)?.success()?;
    ldap.unbind()
}
