mod support;

use std::time::{Duration, Instant};

use livetune::prelude::*;
use support::*;

fn poll_until<F>(guest: &mut Guest, host: &mut Host, mut done: F) -> bool
where
    F: FnMut(&Guest, &Host) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        host.poll();
        guest.poll();
        if done(guest, host) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn schema_and_updates_cross_ipc_channels() {
    let (guest_link, host_link) = ipc_pair().expect("ipc channels");
    let mut host = Host::new(host_link, host_config());
    let mut guest = Guest::new(guest_link, guest_config());

    guest.define_schema(gravity_schema()).expect("define schema");
    assert!(poll_until(&mut guest, &mut host, |_, host| {
        host.mirror().schema.is_some()
    }));

    host.set_value("gravity", 2.5).expect("valid edit");
    assert!(poll_until(&mut guest, &mut host, |guest, _| {
        guest.number("gravity") == Some(2.5)
    }));

    guest.start();
    assert!(poll_until(&mut guest, &mut host, |_, host| {
        host.mirror().status() == GameStatus::Playing
    }));
    assert_eq!(
        host.mirror().ready.as_ref().and_then(|ready| ready.game_id.clone()),
        Some("test-game".to_string())
    );
}
