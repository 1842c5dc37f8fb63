//! Units of measure and dose forms found in clinical text

/// Lowercase surface forms recognised as units. Compound rates such as
/// "mg/dl" are tokenized into their parts, so only the parts are listed.
const UNITS: &[&str] = &[
    // mass
    "mg", "mcg", "µg", "ug", "g", "gm", "gram", "grams", "kg", "ng",
    // volume
    "ml", "cc", "l", "dl", "liter", "liters", "oz",
    // amount and activity
    "meq", "mmol", "mol", "iu", "u", "unit", "units",
    // concentration and rate
    "%", "gtt", "gtts",
    // dose forms
    "tab", "tabs", "tablet", "tablets", "cap", "caps", "capsule", "capsules", "puff", "puffs",
    "drop", "drops", "patch", "patches", "spray", "sprays", "application", "vial", "ampule",
    // length
    "mm", "cm", "m",
    // time
    "h", "hr", "hrs", "hour", "hours", "min", "mins", "minute", "minutes", "day", "days", "wk",
    "wks", "week", "weeks", "mo", "month", "months",
];

/// Whether `word` is a unit of measure or dose form
pub fn is_unit(word: &str) -> bool {
    let lower = word.to_lowercase();
    UNITS.contains(&lower.as_str())
}
