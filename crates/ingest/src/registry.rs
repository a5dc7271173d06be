//! Trial registry identifier conventions.
//!
//! WHO ICTRP aggregates many national registries; each native trial ID is
//! recognised by its leading registry code and qualified with the matching
//! lower-case prefix.

pub const CLINICALTRIALS_PREFIX: &str = "clinicaltrials";
pub const WHO_PREFIX: &str = "who";

// Longer codes first so `JPRN-jRCT` wins over `jRCT`.
const REGISTRY_PREFIXES: &[(&str, &str)] = &[
    ("ClinicalTrials.gov", CLINICALTRIALS_PREFIX),
    ("JPRN-jRCT", "jrct"),
    ("JPRN-UMIN", "uminctr"),
    ("ISRCTN", "isrctn"),
    ("ACTRN", "anzctr"),
    ("ANZCTR", "anzctr"),
    ("NCT", CLINICALTRIALS_PREFIX),
    ("DRKS", "drks"),
    ("RBR", "rebec"),
    ("REBEC", "rebec"),
    ("CRIS", "kcris"),
    ("KCT", "kcris"),
    ("PACTR", "pactr"),
    ("TCTR", "tctr"),
    ("RPCEC", "rpcec"),
    ("EUCTR", "euclinicaltrials"),
    ("CTIS", "ctis"),
    ("LBCTR", "lctr"),
    ("ITMCTR", "itmctr"),
    ("IRCT", "irct"),
    ("CTRI", "ctri"),
    ("ChiCTR", "chictr"),
    ("SLCTR", "slctr"),
    ("jRCT", "jrct"),
    ("PHRR", "phrr"),
    ("PER-", "repec"),
];

const NULL_MARKERS: &[&str] = &["nil", "nil known", "none", "null", "n/a", "na"];

/// True for the placeholder values registries use for "nothing here".
pub fn is_null_marker(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    lowered.is_empty() || NULL_MARKERS.contains(&lowered.as_str())
}

/// Registry prefix for a bare native trial ID, if the registry is known.
pub fn registry_prefix(native_id: &str) -> Option<&'static str> {
    let lowered = native_id.trim().to_lowercase();
    REGISTRY_PREFIXES
        .iter()
        .find(|(code, _)| lowered.starts_with(&code.to_lowercase()))
        .map(|(_, prefix)| *prefix)
}

/// Clean up registry-specific ID quirks.
pub fn normalize_native_id(raw: &str) -> String {
    let mut id = raw.trim().trim_start_matches('\u{feff}').to_string();

    if let Some(rest) = id.strip_prefix("EUCTR") {
        id = rest.split('-').take(3).collect::<Vec<_>>().join("-");
    }
    if id.to_lowercase().starts_with("chictr-") {
        if let Some(rest) = id.get("chictr-".len()..) {
            id = format!("ChiCTR-{}", rest.to_uppercase());
        }
    }
    for prefix in ["JPRN-", "CTIS", "PER-"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            id = rest.to_string();
        }
    }
    id
}

/// Split an identifier into `(prefix, native_id)`.
///
/// Accepts either an already qualified `prefix:ID` form or a bare registry
/// ID. Unknown bare IDs fall back to the `who` prefix. Returns `None` when
/// there is no native part, as in `""` or `"who:"`.
pub fn qualify(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim().trim_start_matches('\u{feff}');
    if let Some((prefix, native)) = split_curie(raw) {
        return Some((prefix, native.to_string()));
    }
    if raw
        .split_once(':')
        .is_some_and(|(prefix, _)| is_prefix(prefix))
    {
        return None;
    }
    let native = normalize_native_id(raw);
    if native.is_empty() {
        return None;
    }
    let prefix = registry_prefix(raw).unwrap_or(WHO_PREFIX);
    Some((prefix.to_string(), native))
}

/// Turn a cross-reference value into a trial ID when its registry is
/// recognised. Null markers and unknown identifiers yield `None`.
pub fn cross_reference_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if is_null_marker(raw) {
        return None;
    }
    if let Some((prefix, native)) = split_curie(raw) {
        return Some(format!("{}:{}", prefix, native));
    }
    let prefix = registry_prefix(raw)?;
    Some(format!("{}:{}", prefix, normalize_native_id(raw)))
}

/// Namespace-free comparison key for secondary-ID matching.
pub fn identity_key(raw: &str) -> String {
    let native = match split_curie(raw.trim()) {
        Some((_, native)) => native.to_string(),
        None => normalize_native_id(raw),
    };
    native
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

// A qualified ID has a short lower-case alphabetic prefix before the colon.
fn split_curie(raw: &str) -> Option<(String, &str)> {
    let (prefix, native) = raw.split_once(':')?;
    if !is_prefix(prefix) || native.trim().is_empty() {
        return None;
    }
    Some((prefix.to_string(), native.trim()))
}

fn is_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.len() <= 20
        && prefix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_prefix() {
        assert_eq!(registry_prefix("NCT00000102"), Some("clinicaltrials"));
        assert_eq!(registry_prefix("ISRCTN12345678"), Some("isrctn"));
        assert_eq!(registry_prefix("JPRN-jRCT2031190001"), Some("jrct"));
        assert_eq!(registry_prefix("jRCT2031190001"), Some("jrct"));
        assert_eq!(registry_prefix("ChiCTR2000029308"), Some("chictr"));
        assert_eq!(registry_prefix("12345"), None);
    }

    #[test]
    fn test_normalize_native_id() {
        assert_eq!(normalize_native_id("EUCTR2004-000001-22-DE"), "2004-000001-22");
        assert_eq!(normalize_native_id("chictr-trc-12001234"), "ChiCTR-TRC-12001234");
        assert_eq!(normalize_native_id("JPRN-UMIN000012345"), "UMIN000012345");
        assert_eq!(normalize_native_id("\u{feff}NCT001 "), "NCT001");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("who:123"), Some(("who".to_string(), "123".to_string())));
        assert_eq!(
            qualify("ISRCTN12345678"),
            Some(("isrctn".to_string(), "ISRCTN12345678".to_string()))
        );
        assert_eq!(qualify("XYZ-1"), Some(("who".to_string(), "XYZ-1".to_string())));
    }

    #[test]
    fn test_qualify_rejects_empty_native_part() {
        assert_eq!(qualify("who:"), None);
        assert_eq!(qualify(" nct: "), None);
        assert_eq!(qualify(""), None);
    }

    #[test]
    fn test_cross_reference_id() {
        assert_eq!(cross_reference_id("NCT001").as_deref(), Some("clinicaltrials:NCT001"));
        assert_eq!(
            cross_reference_id("clinicaltrials:NCT001").as_deref(),
            Some("clinicaltrials:NCT001")
        );
        assert_eq!(cross_reference_id("Nil known"), None);
        assert_eq!(cross_reference_id("sponsor protocol 7"), None);
    }

    #[test]
    fn test_identity_key_ignores_namespace_and_case() {
        assert_eq!(identity_key("isrctn:ISRCTN123"), identity_key("isrctn123"));
        assert_eq!(identity_key("clinicaltrials:NCT001"), "NCT001");
    }
}
