//! The debate turn's state machine: a typestate machine whose transitions
//! are checked at compile time, so a stage function can only be called
//! against the state it expects.

use state_machines::state_machine;

state_machine! {
    name: DebateTurnMachine,
    state: DebateTurnState,
    initial: Ready,
    states: [Ready, Formulate, Retrieving, QuerySpecialist, Validate, Correct, Synthesize, NormalizeCitations, UpdateState, Failed],
    events {
        receive_challenge { transition: { from: Ready, to: Formulate } }
        needs_retrieval { transition: { from: Formulate, to: Retrieving } }
        skip_retrieval { transition: { from: Formulate, to: QuerySpecialist } }
        retrieved { transition: { from: Retrieving, to: QuerySpecialist } }
        dispatch_specialist { transition: { from: QuerySpecialist, to: Validate } }
        accept { transition: { from: Validate, to: Synthesize } }
        flag_hallucination { transition: { from: Validate, to: Correct } }
        recheck { transition: { from: Correct, to: Synthesize } }
        run_synthesis { transition: { from: Synthesize, to: NormalizeCitations } }
        resolve_citations { transition: { from: NormalizeCitations, to: UpdateState } }
        commit { transition: { from: UpdateState, to: Ready } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Formulate, to: Failed }
            transition: { from: Retrieving, to: Failed }
            transition: { from: QuerySpecialist, to: Failed }
            transition: { from: Validate, to: Failed }
            transition: { from: Correct, to: Failed }
            transition: { from: Synthesize, to: Failed }
            transition: { from: NormalizeCitations, to: Failed }
            transition: { from: UpdateState, to: Failed }
        }
    }
}

pub fn ready() -> DebateTurnMachine<(), Ready> {
    DebateTurnMachine::new(())
}
