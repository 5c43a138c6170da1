mod support;

use std::thread;

use livetune::prelude::*;
use serial_test::serial;
use support::*;

fn guest_errors(host: &mut Host) -> Vec<String> {
    host.poll()
        .into_iter()
        .filter_map(|event| match event {
            HostEvent::GuestError(message) => Some(message),
            _ => None,
        })
        .collect()
}

#[test]
#[serial]
fn panics_anywhere_reach_the_host() {
    let (mut guest, mut host) = linked(guest_config(), host_config());
    guest.install_error_hook();
    host.poll();

    let worker = thread::spawn(|| {
        panic!("sprite sheet missing");
    });
    assert!(worker.join().is_err());

    // Caught callback panics are forwarded by the hook only once
    guest.on_state_change(|_| panic!("listener failed"));
    guest.start();

    let errors = guest_errors(&mut host);

    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("sprite sheet missing"));
    assert!(errors[0].contains("error_hook.rs"));
    assert!(errors[1].contains("listener failed"));
}

#[test]
#[serial]
fn reinstalling_retargets_a_single_hook() {
    let (mut first, mut first_host) = linked(guest_config(), host_config());
    let (mut second, mut second_host) = linked(guest_config(), host_config());
    first.install_error_hook();
    first.install_error_hook();
    second.install_error_hook();
    first_host.poll();
    second_host.poll();

    let worker = thread::spawn(|| {
        panic!("shader compile failed");
    });
    assert!(worker.join().is_err());

    assert!(guest_errors(&mut first_host).is_empty());
    let errors = guest_errors(&mut second_host);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("shader compile failed"));
}

#[test]
#[serial]
fn reporter_is_usable_from_other_threads() {
    let (guest, mut host) = linked(guest_config(), host_config());
    let reporter = guest.error_reporter();

    thread::spawn(move || reporter.report("audio device lost"))
        .join()
        .expect("reporter thread");

    host.poll();
    assert_eq!(
        host.mirror().last_error.as_deref(),
        Some("audio device lost")
    );
}
