// Demonstrates observing protocol traffic through the event bus
// while running a search.

use std::sync::Arc;

use ldapwire::result::Result;
use ldapwire::{Event, EventBus, EventKind, Ldap, LdapConnSettings, Scope};

fn main() -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let mut writes = bus.subscribe(EventKind::Write);
    let mut searches = bus.subscribe(EventKind::Search);
    let settings = LdapConnSettings::new().set_instrument(bus.clone());
    let mut ldap = Ldap::with_settings(settings, "ldap://localhost:2389")?;
    let (rs, _res) = ldap
        .search(
            "ou=Places,dc=example,dc=org",
            Scope::Subtree,
            "(&(objectClass=locality)(l=ma*))",
            vec!["l"],
        )?
        .success()?;
    for entry in rs {
        println!("{}", entry.dn);
    }
    while let Ok(Event::Write {
        message_id,
        content_length,
        ..
    }) = writes.try_recv()
    {
        println!("wrote {} bytes for message {}", content_length, message_id);
    }
    if let Ok(Event::Search { entries, result, .. }) = searches.try_recv() {
        println!("{} entries, {}", entries, result);
    }
    ldap.unbind()
}
