#![allow(dead_code)]

use livetune::prelude::*;

pub fn guest_config() -> GuestConfig {
    GuestConfig {
        game_id: Some("test-game".to_string()),
        ack_timeout_ms: 50,
        announce_retry_ms: 20,
        announce_retries: 0,
        persist_high_score: false,
        ..GuestConfig::default()
    }
}

pub fn host_config() -> HostConfig {
    HostConfig {
        schema_request_after_ms: 60_000,
        ..HostConfig::default()
    }
}

/// Guest and host joined by an in-process link
pub fn linked(guest_config: GuestConfig, host_config: HostConfig) -> (Guest, Host) {
    let (guest_link, host_link) = local_pair();
    let host = Host::new(host_link, host_config);
    let guest = Guest::new(guest_link, guest_config);
    (guest, host)
}

/// One round trip: the host drains what the guest sent so far, then the
/// guest applies whatever the host sent back.
pub fn exchange(guest: &mut Guest, host: &mut Host) -> Vec<HostEvent> {
    let events = host.poll();
    guest.poll();
    events
}

pub fn gravity_schema() -> Vec<SchemaProperty> {
    vec![SchemaProperty::number("gravity", 0.6).label("Gravity")]
}

pub fn speed_schema() -> Vec<SchemaProperty> {
    vec![SchemaProperty::range("speed", 5.0, (1.0, 10.0), 1.0)]
}
