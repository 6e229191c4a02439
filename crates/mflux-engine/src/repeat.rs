use mflux_contracts::models::FormatPresets;
use mflux_contracts::plan::{RequestInputs, StyleLookup, MAX_VARY_SEED};
use mflux_contracts::runs::summary::RunSummary;

/// Inputs that run `last` again. Fields set in `overrides` win, except the
/// prompt, which always comes from `last`.
///
/// A style recorded on `last` is peeled off the stored prompt and re-applied
/// by name, so a new `--style` replaces it instead of stacking on top.
pub fn inputs_from_run(
    last: &RunSummary,
    overrides: &RequestInputs,
    styles: &dyn StyleLookup,
    presets: &FormatPresets,
) -> RequestInputs {
    let mut inputs = overrides.clone();
    let (prompt, style) = split_style(last, styles);
    inputs.prompt = prompt;
    if inputs.style.is_none() {
        inputs.style = style;
    }
    if inputs.format.is_none() {
        inputs.format = presets.format_argument(last.resolution);
    }
    if inputs.seed.is_none() && inputs.vary_seed.is_none() && inputs.vary_steps.is_none() {
        inputs.vary_seed = Some(last.total_variations.clamp(1, MAX_VARY_SEED));
    }
    inputs
}

fn split_style(last: &RunSummary, styles: &dyn StyleLookup) -> (String, Option<String>) {
    let Some(name) = last.style.as_deref() else {
        return (last.prompt.clone(), None);
    };
    let base = styles.style_suffix(name).and_then(|suffix| {
        last.prompt
            .strip_suffix(&format!(", {}", suffix.trim()))
            .map(str::to_string)
    });
    match base {
        Some(base) => (base, Some(name.to_string())),
        None => (last.prompt.clone(), None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use mflux_contracts::models::{FormatPresets, Resolution};
    use mflux_contracts::plan::{NoStyles, RequestInputs};
    use mflux_contracts::runs::summary::RunSummary;

    use super::inputs_from_run;
    use crate::store::tests::{request, variation};

    fn summary(count: u32) -> RunSummary {
        let variations = (1..=count as u64).map(variation).collect::<Vec<_>>();
        RunSummary::new(1, &request(count), &variations, "2026-10-18T10:00:00Z".to_string())
    }

    #[test]
    fn unset_fields_come_from_the_last_run() {
        let mut last = summary(3);
        last.resolution = Resolution::new(1024, 576);
        let inputs = inputs_from_run(
            &last,
            &RequestInputs::default(),
            &NoStyles,
            &FormatPresets::default(),
        );
        assert_eq!(inputs.prompt, "a forest");
        assert_eq!(inputs.format.as_deref(), Some("landscape"));
        assert_eq!(inputs.vary_seed, Some(3));
        assert_eq!(inputs.style, None);
    }

    #[test]
    fn explicit_fields_win() {
        let mut overrides = RequestInputs::default();
        overrides.format = Some("portrait".to_string());
        overrides.seed = Some(11);
        let inputs = inputs_from_run(&summary(4), &overrides, &NoStyles, &FormatPresets::default());
        assert_eq!(inputs.format.as_deref(), Some("portrait"));
        assert_eq!(inputs.seed, Some(11));
        assert_eq!(inputs.vary_seed, None);
    }

    #[test]
    fn style_is_peeled_off_and_carried_by_name() {
        let mut styles = BTreeMap::new();
        styles.insert("noir".to_string(), "black and white".to_string());
        styles.insert("pastel".to_string(), "soft pastel tones".to_string());
        let mut last = summary(2);
        last.prompt = "a forest, black and white".to_string();
        last.style = Some("noir".to_string());
        let presets = FormatPresets::default();

        let carried = inputs_from_run(&last, &RequestInputs::default(), &styles, &presets);
        assert_eq!(carried.prompt, "a forest");
        assert_eq!(carried.style.as_deref(), Some("noir"));

        let mut overrides = RequestInputs::default();
        overrides.style = Some("pastel".to_string());
        let replaced = inputs_from_run(&last, &overrides, &styles, &presets);
        assert_eq!(replaced.prompt, "a forest");
        assert_eq!(replaced.style.as_deref(), Some("pastel"));

        let forgotten = inputs_from_run(&last, &RequestInputs::default(), &NoStyles, &presets);
        assert_eq!(forgotten.prompt, "a forest, black and white");
        assert_eq!(forgotten.style, None);
    }
}
