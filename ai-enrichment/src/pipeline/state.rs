use state_machines::state_machine;

state_machine! {
    name: EnrichmentMachine,
    state: EnrichmentState,
    initial: Ready,
    states: [Ready, Scrubbed, Extracted, Embedded, Failed],
    events {
        scrub { transition: { from: Ready, to: Scrubbed } }
        extract { transition: { from: Scrubbed, to: Extracted } }
        embed { transition: { from: Extracted, to: Embedded } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Scrubbed, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Embedded, to: Failed }
        }
    }
}

pub fn ready() -> EnrichmentMachine<(), Ready> {
    EnrichmentMachine::new(())
}
