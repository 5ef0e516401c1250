use std::path::Path;

use sed_opal::sim::SimulatedDrive;
use sed_opal::status::{self, SED_STATUS_NOT_AUTHORIZED, SED_STATUS_SP_BUSY};
use sed_opal::{
    run, ConfigError, DiscoveryStyle, ErrorKind, LockingRange, OpalDeviceState, OperationRequest,
    Outcome, ScriptedPrompt, SedError, Verb,
};

const DEV: &str = "/dev/nvme0n1";
const PSID: &str = "0123456789ABCDEF0123456789ABCDEF";

fn req(verb: Verb) -> OperationRequest {
    OperationRequest::new(verb)
}

fn with_key(verb: Verb) -> OperationRequest {
    OperationRequest {
        ask_key: true,
        ..OperationRequest::new(verb)
    }
}

fn psid_revert() -> OperationRequest {
    OperationRequest {
        use_psid: true,
        ..OperationRequest::new(Verb::Revert)
    }
}

fn destructive_revert() -> OperationRequest {
    OperationRequest {
        destructive: true,
        ..OperationRequest::new(Verb::Revert)
    }
}

fn exec(drive: &SimulatedDrive, request: &OperationRequest) -> sed_opal::Result<Outcome> {
    run(drive, &mut ScriptedPrompt::default(), Path::new(DEV), request)
}

fn exec_with(
    drive: &SimulatedDrive,
    request: &OperationRequest,
    answers: &[&str],
) -> sed_opal::Result<Outcome> {
    let mut prompt = ScriptedPrompt::new(answers.iter().copied());
    let result = run(drive, &mut prompt, Path::new(DEV), request);
    assert_eq!(prompt.remaining(), 0, "unused scripted answers");
    result
}

fn discover(drive: &SimulatedDrive) -> sed_opal::Discovery {
    match exec(drive, &req(Verb::Discover)) {
        Ok(Outcome::Discovered(d)) => d,
        other => panic!("discover failed: {other:?}"),
    }
}

#[test]
fn discover_fresh_drive() {
    let drive = SimulatedDrive::new(PSID);
    let d = discover(&drive);

    assert!(d.locking_supported());
    assert!(!d.flags().enabled());
    assert_eq!(d.state, OpalDeviceState::Uninitialized);
    assert_eq!(
        d.ranges,
        vec![LockingRange {
            index: 0,
            read_only: false,
            locked: false
        }]
    );
    assert_eq!(drive.state(), OpalDeviceState::Uninitialized);
}

#[test]
fn initialize_then_lock_with_default_credential() {
    let drive = SimulatedDrive::new(PSID);

    exec(&drive, &req(Verb::Initialize)).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Initialized);

    exec(&drive, &req(Verb::Lock)).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Locked);
    assert!(drive.range().locked);

    let d = discover(&drive);
    assert!(d.flags().locked());
    assert_eq!(d.state, OpalDeviceState::Locked);
}

#[test]
fn unlock_with_wrong_secret_keeps_drive_locked() {
    let drive = SimulatedDrive::new(PSID).provisioned(Some("correct horse"), true);

    let err = exec_with(&drive, &with_key(Verb::Unlock), &["battery staple"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(drive.state(), OpalDeviceState::Locked);
    assert!(drive.range().locked);

    exec_with(&drive, &with_key(Verb::Unlock), &["correct horse"]).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Unlocked);
}

#[test]
fn psid_revert_recovers_locked_drive() {
    let drive = SimulatedDrive::new(PSID).provisioned(Some("lost password"), true);

    let mut prompt = ScriptedPrompt::new([PSID]);
    run(&drive, &mut prompt, Path::new(DEV), &psid_revert()).unwrap();

    assert_eq!(prompt.asked(), ["PSID: "]);
    assert_eq!(drive.state(), OpalDeviceState::Uninitialized);
    assert!(drive.is_factory_fresh());
}

#[test]
fn wrong_psid_changes_nothing() {
    let drive = SimulatedDrive::new(PSID).provisioned(None, true);

    let err = exec_with(&drive, &psid_revert(), &["NOT-THE-PSID"]).unwrap_err();
    assert!(matches!(err, SedError::AuthFailure(_)));
    assert_eq!(drive.state(), OpalDeviceState::Locked);
}

#[test]
fn psid_revert_ignores_owner_credential() {
    let drive = SimulatedDrive::new(PSID);
    // the PSID is not an owner credential
    let req = OperationRequest {
        ask_key: true,
        ..psid_revert()
    };
    exec_with(&drive, &req, &[PSID]).unwrap();
    assert!(drive.is_factory_fresh());
}

#[test]
fn lock_on_character_device_never_reaches_channel() {
    let drive = SimulatedDrive::new(PSID).character_device();

    let err = exec(&drive, &req(Verb::Lock)).unwrap_err();
    assert!(matches!(
        err,
        SedError::Config(ConfigError::NotABlockDevice(_))
    ));
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(drive.opens(), 0);
    assert_eq!(drive.exchanges(), 0);
}

#[test]
fn every_verb_refuses_non_block_devices() {
    let requests = [
        req(Verb::Discover),
        req(Verb::Initialize),
        req(Verb::Lock),
        req(Verb::Unlock),
        destructive_revert(),
        psid_revert(),
        req(Verb::Password),
    ];
    for r in &requests {
        let drive = SimulatedDrive::new(PSID).character_device();
        let err = exec(&drive, r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config, "{:?}", r.verb);
        assert_eq!(drive.exchanges(), 0);
    }
}

#[test]
fn initialize_twice_is_rejected() {
    let drive = SimulatedDrive::new(PSID);
    exec(&drive, &req(Verb::Initialize)).unwrap();
    let exchanges = drive.exchanges();

    let err = exec(&drive, &req(Verb::Initialize)).unwrap_err();
    assert!(matches!(
        err,
        SedError::Config(ConfigError::InvalidState {
            verb: Verb::Initialize,
            ..
        })
    ));
    // only the discovery went out
    assert_eq!(drive.exchanges(), exchanges + 1);
    assert_eq!(drive.state(), OpalDeviceState::Initialized);
}

#[test]
fn lock_requires_initialized_drive() {
    let drive = SimulatedDrive::new(PSID);
    let err = exec(&drive, &req(Verb::Lock)).unwrap_err();
    assert!(matches!(
        err,
        SedError::Config(ConfigError::InvalidState {
            state: OpalDeviceState::Uninitialized,
            ..
        })
    ));
    assert!(drive.is_factory_fresh());
}

#[test]
fn initialize_with_custom_password() {
    let drive = SimulatedDrive::new(PSID);
    let init = OperationRequest {
        read_only: true,
        ..with_key(Verb::Initialize)
    };
    exec_with(&drive, &init, &["pw1", "pw1"]).unwrap();
    assert!(drive.range().read_only);

    // the default credential no longer works
    let err = exec(&drive, &req(Verb::Lock)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(drive.state(), OpalDeviceState::Initialized);

    exec_with(&drive, &with_key(Verb::Lock), &["pw1"]).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Locked);
}

#[test]
fn initialize_with_mismatched_passwords_sends_nothing_mutating() {
    let drive = SimulatedDrive::new(PSID);
    let err = exec_with(&drive, &with_key(Verb::Initialize), &["a", "b"]).unwrap_err();
    assert!(matches!(err, SedError::Config(ConfigError::SecretMismatch)));
    assert!(drive.is_factory_fresh());
    assert_eq!(drive.exchanges(), 1);
}

fn read_only(verb: Verb) -> OperationRequest {
    OperationRequest {
        read_only: true,
        ..req(verb)
    }
}

const WRITE_LOCKED: LockingRange = LockingRange {
    index: 0,
    read_only: true,
    locked: true,
};

#[test]
fn read_only_lock_and_unlock() {
    let drive = SimulatedDrive::new(PSID).provisioned(None, false);
    exec(&drive, &read_only(Verb::Lock)).unwrap();
    assert_eq!(drive.range(), WRITE_LOCKED);
    assert_eq!(drive.state(), OpalDeviceState::Locked);

    exec(&drive, &req(Verb::Unlock)).unwrap();
    assert_eq!(drive.range(), LockingRange::default());
    assert_eq!(drive.state(), OpalDeviceState::Unlocked);
}

#[test]
fn read_only_unlock_leaves_range_write_locked() {
    let drive = SimulatedDrive::new(PSID).provisioned(None, true);
    exec(&drive, &read_only(Verb::Unlock)).unwrap();

    // same request on the wire as lock --read-only
    assert_eq!(drive.range(), WRITE_LOCKED);
    assert_eq!(drive.state(), OpalDeviceState::Locked);
    assert!(discover(&drive).flags().locked());

    let other = SimulatedDrive::new(PSID).provisioned(None, true);
    exec(&other, &read_only(Verb::Lock)).unwrap();
    assert_eq!(other.range(), drive.range());
    assert_eq!(other.state(), drive.state());
}

#[test]
fn password_change_replaces_owner_credential() {
    let drive = SimulatedDrive::new(PSID).provisioned(None, false);

    exec_with(&drive, &req(Verb::Password), &["new-pw", "new-pw"]).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Initialized);

    assert_eq!(
        exec(&drive, &req(Verb::Lock)).unwrap_err().kind(),
        ErrorKind::AuthFailure
    );
    exec_with(&drive, &with_key(Verb::Lock), &["new-pw"]).unwrap();

    exec_with(&drive, &with_key(Verb::Password), &["new-pw", "third", "third"]).unwrap();
    exec_with(&drive, &with_key(Verb::Unlock), &["third"]).unwrap();
}

#[test]
fn password_with_wrong_current_is_auth_failure() {
    let drive = SimulatedDrive::new(PSID).provisioned(Some("right"), false);
    let err = exec_with(&drive, &with_key(Verb::Password), &["wrong", "n", "n"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);

    exec_with(&drive, &with_key(Verb::Lock), &["right"]).unwrap();
}

#[test]
fn password_requires_initialized_drive() {
    let drive = SimulatedDrive::new(PSID);
    let err = exec(&drive, &req(Verb::Password)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn destructive_revert_returns_to_factory_state() {
    let drive = SimulatedDrive::new(PSID);
    exec(&drive, &req(Verb::Initialize)).unwrap();
    exec(&drive, &req(Verb::Lock)).unwrap();

    exec(&drive, &destructive_revert()).unwrap();
    assert!(drive.is_factory_fresh());

    // a reverted drive can be initialized again
    exec(&drive, &req(Verb::Initialize)).unwrap();
    assert_eq!(drive.state(), OpalDeviceState::Initialized);
}

#[test]
fn destructive_revert_with_wrong_key_changes_nothing() {
    let drive = SimulatedDrive::new(PSID).provisioned(Some("owner"), true);
    let revert = OperationRequest {
        ask_key: true,
        ..destructive_revert()
    };
    let err = exec_with(&drive, &revert, &["guess"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(drive.state(), OpalDeviceState::Locked);

    exec_with(&drive, &revert, &["owner"]).unwrap();
    assert!(drive.is_factory_fresh());
}

#[test]
fn revert_needs_a_mode_before_opening() {
    let drive = SimulatedDrive::new(PSID);
    let err = exec(&drive, &req(Verb::Revert)).unwrap_err();
    assert!(matches!(err, SedError::Config(ConfigError::RevertMode)));
    assert_eq!(drive.opens(), 0);

    let both = OperationRequest {
        destructive: true,
        ..psid_revert()
    };
    assert!(exec(&drive, &both).is_err());
    assert_eq!(drive.opens(), 0);
}

#[test]
fn unsupported_drive_reports_not_supported() {
    let drive = SimulatedDrive::new(PSID).unsupported();
    for r in [req(Verb::Discover), req(Verb::Initialize), req(Verb::Lock)] {
        let err = exec(&drive, &r).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
    assert_eq!(drive.opens(), drive.releases());
}

#[test]
fn revert_on_unsupported_drive_is_silent() {
    let drive = SimulatedDrive::new(PSID).unsupported();

    let err = exec(&drive, &destructive_revert()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert_eq!(status::report(Verb::Revert, &err), None);

    let err = exec_with(&drive, &psid_revert(), &[PSID]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    assert_eq!(status::report(Verb::Revert, &err), None);

    assert_eq!(drive.opens(), 2);
    assert_eq!(drive.releases(), 2);
}

#[test]
fn discover_without_locking_descriptor_still_reports() {
    let drive = SimulatedDrive::new(PSID).without_locking();
    let d = discover(&drive);

    assert_eq!(d.locking, None);
    assert!(!d.locking_supported());
    assert!(d.ranges.is_empty());

    let verbose = d.report(DiscoveryStyle::Verbose).to_string();
    assert!(verbose.contains("Locking Supported : no"), "{verbose}");
    assert!(verbose.contains("TPer (0x0001"), "{verbose}");
    assert!(verbose.contains("Opal SSC V2.00 (0x0203"), "{verbose}");
    assert_eq!(
        d.report(DiscoveryStyle::Udev).to_string(),
        "DEV_SED_LOCKING=DISABLED\nDEV_SED_LOCKED=UNLOCKED\n"
    );
}

#[test]
fn mutating_verbs_need_a_locking_descriptor() {
    let drive = SimulatedDrive::new(PSID).without_locking();
    for verb in [Verb::Initialize, Verb::Lock, Verb::Unlock, Verb::Password] {
        let before = drive.exchanges();
        let err = exec(&drive, &req(verb)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported, "{verb}");
        assert_eq!(drive.exchanges(), before + 1, "{verb}");
    }
    assert!(drive.is_factory_fresh());
}

#[test]
fn other_statuses_are_protocol_failures() {
    let drive = SimulatedDrive::new(PSID).provisioned(None, false);
    drive.inject_status(SED_STATUS_SP_BUSY);
    let err = exec(&drive, &req(Verb::Discover)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
    assert_eq!(err.to_string(), "SP Session Busy");
}

#[test]
fn enomem_is_an_allocation_failure() {
    let drive = SimulatedDrive::new(PSID);
    drive.inject_status(-libc::ENOMEM);
    let err = exec(&drive, &req(Verb::Discover)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllocationFailure);
}

#[test]
fn empty_discovery_page_stops_initialize() {
    let drive = SimulatedDrive::new(PSID);
    // a zero status with no payload
    drive.inject_status(0);
    let err = exec(&drive, &req(Verb::Initialize)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolFailure);
    assert_eq!(drive.exchanges(), 1);
    assert!(drive.is_factory_fresh());
    assert_eq!(drive.opens(), 1);
    assert_eq!(drive.releases(), 1);
}

#[test]
fn auth_failure_reports_plainly_for_revert_only() {
    let drive = SimulatedDrive::new(PSID).provisioned(Some("owner"), true);
    drive.inject_status(SED_STATUS_NOT_AUTHORIZED);
    let err = exec(&drive, &destructive_revert()).unwrap_err();

    let line = status::report(Verb::Revert, &err).unwrap();
    assert!(line.contains("nothing was reverted"), "{line}");
    let line = status::report(Verb::Unlock, &err).unwrap();
    assert_eq!(line, "unlock: SED error - Host Not Authorized");
}

#[test]
fn device_is_released_once_per_invocation() {
    let drive = SimulatedDrive::new(PSID);
    let _ = exec(&drive, &req(Verb::Discover));
    let _ = exec(&drive, &req(Verb::Lock));
    let _ = exec(&drive, &req(Verb::Initialize));
    let _ = exec_with(&drive, &with_key(Verb::Unlock), &["wrong"]);
    let _ = exec(&drive, &req(Verb::Revert));
    assert_eq!(drive.opens(), 4);
    assert_eq!(drive.releases(), 4);
}
