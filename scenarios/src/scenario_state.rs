use state_machines::state_machine;

state_machine! {
    name: ScenarioMachine,
    state: ScenarioState,
    initial: Ready,
    states: [Ready, Running, Passed, Failed],
    events {
        start { transition: { from: Ready, to: Running } }
        pass { transition: { from: Running, to: Passed } }
        fail { transition: { from: Running, to: Failed } }
    }
}

pub fn ready() -> ScenarioMachine<(), Ready> {
    ScenarioMachine::new(())
}
