mod planner;
mod reproduce;
mod request;

pub use planner::{Variation, VariationPlanner, SEED_MAX, SEED_MIN};
pub use reproduce::{reproduction_command, reproduction_inputs, COMMAND_NAME};
pub use request::{
    parse_step_list, GenerationRequest, NoStyles, RequestInputs, StyleLookup, VariationMode,
    DEFAULT_ITERATIONS, MAX_VARY_SEED,
};
