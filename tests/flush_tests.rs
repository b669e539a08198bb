use regionsim::flush::{FlushSimulator, FlushStatusError};

#[regionsim::test]
fn test_disabled_always_accepts() {
    let mut sim = FlushSimulator::new(false);
    assert_eq!(sim.check(0), Ok(()));
    assert_eq!(sim.check(42), Ok(()));

    // Flushing and resetting keep it disabled.
    sim.flush(3);
    assert_eq!(sim, FlushSimulator::Disabled);
    sim.reset();
    assert_eq!(sim.check(7), Ok(()));
}

#[regionsim::test]
fn test_unflushed_rejects() {
    let sim = FlushSimulator::new(true);
    assert_eq!(sim, FlushSimulator::Unflushed);
    assert_eq!(sim.check(0), Err(FlushStatusError::NotFlushed));
    assert_eq!(sim.flushed_epoch(), None);
}

#[regionsim::test]
fn test_flushed_matches_only_its_epoch() {
    let mut sim = FlushSimulator::new(true);
    sim.flush(0);
    assert_eq!(sim.check(0), Ok(()));
    assert_eq!(sim.flushed_epoch(), Some(0));

    sim.flush(2);
    assert_eq!(sim.check(2), Ok(()));
    assert_eq!(sim.check(1), Err(FlushStatusError::EpochMismatch));
    assert_eq!(sim.check(3), Err(FlushStatusError::EpochMismatch));
}

#[regionsim::test]
fn test_reset_and_fork_forget_flush() {
    let mut sim = FlushSimulator::new(true);
    sim.flush(5);
    let forked = sim.fork();
    assert_eq!(forked, FlushSimulator::Unflushed);
    assert_eq!(sim.check(5), Ok(()));

    sim.reset();
    assert_eq!(sim.check(5), Err(FlushStatusError::NotFlushed));
}

#[regionsim::test]
fn test_error_messages() {
    assert_eq!(FlushStatusError::NotFound.to_string(), "not found");
    assert_eq!(FlushStatusError::NotFlushed.to_string(), "not flushed");
    assert_eq!(FlushStatusError::EpochMismatch.to_string(), "flushed epoch not match");
}
