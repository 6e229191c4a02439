use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::request::{
    check_vary_seed, dedup_steps, GenerationRequest, RequestInputs, StyleLookup, VariationMode,
};
use crate::error::{CommanderError, CommanderResult};
use crate::models::{FormatPresets, Model, Resolution};

pub const SEED_MIN: u64 = 1;
pub const SEED_MAX: u64 = 2_147_483_647;

/// One concrete invocation of the external generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variation {
    pub seed: u64,
    pub steps: u32,
    pub resolution: Resolution,
    pub prompt: String,
    pub model: Model,
}

#[derive(Debug, Clone, Default)]
pub struct VariationPlanner {
    pub presets: FormatPresets,
}

impl VariationPlanner {
    pub fn new(presets: Option<FormatPresets>) -> Self {
        Self {
            presets: presets.unwrap_or_default(),
        }
    }

    pub fn request(
        &self,
        inputs: &RequestInputs,
        styles: &dyn StyleLookup,
    ) -> CommanderResult<GenerationRequest> {
        inputs.resolve(styles, &self.presets)
    }

    /// Expands `request` into the ordered variations to execute.
    ///
    /// Seed order for vary-seed, step-list order for vary-steps. The only
    /// source of nondeterminism is `rng`.
    pub fn plan<R: Rng + ?Sized>(
        &self,
        request: &GenerationRequest,
        rng: &mut R,
    ) -> CommanderResult<Vec<Variation>> {
        if request.prompt.trim().is_empty() {
            return Err(CommanderError::validation("--prompt", "must not be empty"));
        }
        if request.steps == 0 {
            return Err(CommanderError::validation("--steps", "must be at least 1"));
        }
        let variation = |seed: u64, steps: u32| Variation {
            seed,
            steps,
            resolution: request.resolution,
            prompt: request.prompt.clone(),
            model: request.model,
        };

        match &request.mode {
            VariationMode::Fixed { seed } => Ok(vec![variation(*seed, request.steps)]),
            VariationMode::VarySeed { count } => {
                check_vary_seed(*count)?;
                Ok(draw_distinct_seeds(*count as usize, rng)
                    .into_iter()
                    .map(|seed| variation(seed, request.steps))
                    .collect())
            }
            VariationMode::VarySteps { seed, steps } => Ok(dedup_steps(steps)?
                .into_iter()
                .map(|steps| variation(*seed, steps))
                .collect()),
        }
    }

    /// Resolves and plans in one pass; nothing is touched on disk.
    pub fn plan_inputs<R: Rng + ?Sized>(
        &self,
        inputs: &RequestInputs,
        styles: &dyn StyleLookup,
        rng: &mut R,
    ) -> CommanderResult<(GenerationRequest, Vec<Variation>)> {
        let request = self.request(inputs, styles)?;
        let variations = self.plan(&request, rng)?;
        Ok((request, variations))
    }
}

fn draw_distinct_seeds<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    let mut seeds = Vec::new();
    while seeds.len() < count {
        let seed = rng.gen_range(SEED_MIN..=SEED_MAX);
        if seen.insert(seed) {
            seeds.push(seed);
        }
    }
    seeds
}
