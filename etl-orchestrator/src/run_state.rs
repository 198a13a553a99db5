use state_machines::state_machine;

state_machine! {
    name: RunMachine,
    state: RunState,
    initial: Idle,
    states: [Idle, Leased, Reading, Writing, Advancing, Done, Aborted],
    events {
        lease { transition: { from: Idle, to: Leased } }
        read { transition: { from: Leased, to: Reading } }
        write { transition: { from: Reading, to: Writing } }
        advance { transition: { from: Writing, to: Advancing } }
        next_batch { transition: { from: Advancing, to: Reading } }
        complete {
            transition: { from: Advancing, to: Done }
            transition: { from: Reading, to: Done }
        }
        abort {
            transition: { from: Idle, to: Aborted }
            transition: { from: Leased, to: Aborted }
            transition: { from: Reading, to: Aborted }
            transition: { from: Writing, to: Aborted }
            transition: { from: Advancing, to: Aborted }
        }
    }
}

pub fn idle() -> RunMachine<(), Idle> {
    RunMachine::new(())
}
