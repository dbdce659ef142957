use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::capability::Normalizer;
use crate::error::CapabilityError;
use crate::schema::{Condition, MasterRecord, Medication, Observation};

/// Words that describe a dose or a pharmaceutical form rather than a substance.
const DOSE_WORDS: &[&str] = &[
    "mg", "g", "ml", "mcg", "µg", "ug", "ui", "cp", "cpr", "compressa", "compresse", "capsula",
    "capsule", "fiala", "fiale", "bustina", "bustine", "gocce", "cerotto", "flacone",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymGroup {
    pub canonical: String,
    pub aliases: Vec<String>,
}

impl SynonymGroup {
    fn new(canonical: &str, aliases: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// The fixed rule set handed to every `Normalizer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRules {
    /// Brand/generic groups for medications
    pub medication_synonyms: Vec<SynonymGroup>,
    /// Synonym groups for diagnoses
    pub condition_synonyms: Vec<SynonymGroup>,
    /// Regexes matching administrative metadata masquerading as observations
    pub admin_patterns: Vec<String>,
    /// Regexes matching a measurement typed as a condition
    pub measurement_patterns: Vec<String>,
    /// Encoding artifacts and unit spellings, applied in order
    pub unit_replacements: Vec<(String, String)>,
}

impl Default for RefinementRules {
    fn default() -> Self {
        Self {
            medication_synonyms: vec![
                SynonymGroup::new("selegilina", &["jumex"]),
                SynonymGroup::new("evolocumab", &["repatha"]),
                SynonymGroup::new("pramipexolo", &["mirapexin"]),
                SynonymGroup::new("duloxetina", &["cymbalta", "alikres"]),
                SynonymGroup::new("acido acetilsalicilico", &["cardioaspirina", "aspirina", "cardirene"]),
                SynonymGroup::new("empagliflozin", &["jardiance"]),
                SynonymGroup::new("pantoprazolo", &["pantorc", "peptazol"]),
                SynonymGroup::new("atorvastatina", &["torvast", "totalip"]),
                SynonymGroup::new("levodopa", &["madopar", "sinemet"]),
            ],
            condition_synonyms: vec![
                SynonymGroup::new("Parkinson's Disease", &["malattia di parkinson", "parkinson", "morbo di parkinson"]),
                SynonymGroup::new("Ipertensione arteriosa", &["ipertensione", "iper tensione arteriosa"]),
                SynonymGroup::new("Diabete mellito tipo 2", &["diabete mellito di tipo 2", "dm2", "diabete tipo 2"]),
            ],
            admin_patterns: vec![
                r"(?i)^\s*(pag(ina)?|page)\b".to_string(),
                r"(?i)\b(codice fiscale|tessera sanitaria|n\.?\s*ricovero|cartella clinica|nosologico)\b".to_string(),
                r"(?i)\b(ospedale|azienda (ospedaliera|sanitaria)|reparto|ambulatorio|asl|asst)\b".to_string(),
                r"(?i)\b(tel|fax|e-?mail|data stampa|stampato il|firmato|medico refertante)\b".to_string(),
            ],
            measurement_patterns: vec![
                r"(?i)\d+(?:[.,]\d+)?\s*(mg/dl|mmol/l|g/dl|g/l|u/l|ui/l|mui/l|ng/ml|pg/ml|µg/l|mmhg|bpm|%)".to_string(),
                r"(?i)^(creatinina|glicemia|emoglobina|colesterolo|trigliceridi|azotemia|sodio|potassio|hba1c|pcr|tsh)\b.*\d".to_string(),
            ],
            unit_replacements: vec![
                ("Âµ".to_string(), "µ".to_string()),
                ("Î¼".to_string(), "µ".to_string()),
                ("μ".to_string(), "µ".to_string()),
                ("Â°".to_string(), "°".to_string()),
                ("µbcg".to_string(), "µg".to_string()),
                ("mcg".to_string(), "µg".to_string()),
            ],
        }
    }
}

impl RefinementRules {
    /// The rule set phrased as instructions for a model-backed normalizer.
    pub fn instructions(&self) -> Vec<String> {
        let med_hints: Vec<String> = self
            .medication_synonyms
            .iter()
            .map(|g| format!("{} = {}", g.canonical, g.aliases.join("/")))
            .collect();

        vec![
            format!(
                "MEDICATIONS: merge entries naming the same substance under brand or generic names (e.g. {}). \
                 Each medication appears ONLY ONCE; keep the most detailed dosage string.",
                med_hints.join("; ")
            ),
            "CONDITIONS: entries that are laboratory measurements (a test name with a numeric value or unit) \
             belong in observations; move them there or drop them. Remove conditions that are actually medications."
                .to_string(),
            "OBSERVATIONS: remove administrative metadata (page numbers, hospital headers, record numbers, \
             medication names) that is not a clinical measurement."
                .to_string(),
            "OBSERVATIONS: deduplicate ONLY entries identical in test_name, value AND date. \
             The same test on different dates must be kept."
                .to_string(),
            "UNITS: fix encoding artifacts and normalize spellings (e.g. 'Âµg', 'mcg', 'µbcg' -> 'µg')."
                .to_string(),
        ]
    }
}

/// Maps name variants to a canonical key: lowercase, punctuation and dose
/// stripped, known synonyms folded together. Names outside the synonym table
/// are never merged with each other.
pub struct EntityNormalizer {
    /// Cleaned alias -> canonical, in rule order
    synonyms: Vec<(String, String)>,
    /// Every name resolved so far, synonyms included
    resolved: HashMap<String, String>,
}

impl EntityNormalizer {
    pub fn new() -> Self {
        Self {
            synonyms: Vec::new(),
            resolved: HashMap::new(),
        }
    }

    pub fn with_synonyms(groups: &[SynonymGroup]) -> Self {
        let mut normalizer = Self::new();
        for group in groups {
            let canonical = clean_name(&group.canonical);
            let names = std::iter::once(canonical.clone()).chain(group.aliases.iter().map(|a| clean_name(a)));
            for alias in names.filter(|a| !a.is_empty()) {
                // An alias listed twice keeps its first group
                if !normalizer.resolved.contains_key(&alias) {
                    normalizer.resolved.insert(alias.clone(), canonical.clone());
                    normalizer.synonyms.push((alias, canonical.clone()));
                }
            }
        }
        normalizer
    }

    /// Normalize entity name and resolve it to its canonical form
    pub fn normalize(&mut self, name: &str) -> String {
        let normalized = clean_name(name);

        if let Some(canonical) = self.resolved.get(&normalized) {
            return canonical.clone();
        }

        // A known alias mentioned anywhere in the name, e.g. "Jumex (Selegilina)".
        // The first group in rule order wins.
        let canonical = self
            .synonyms
            .iter()
            .find(|(alias, _)| contains_words(&normalized, alias))
            .map(|(_, canonical)| canonical.clone())
            .unwrap_or_else(|| normalized.clone());

        self.resolved.insert(normalized, canonical.clone());
        canonical
    }
}

impl Default for EntityNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, drop punctuation and dose quantities, collapse whitespace.
///
/// Identifiers that carry digits ("B12", "D3", "tipo 2") are kept; only a
/// quantity with its unit ("10mg", "1.25 mg") or a bare unit goes.
fn clean_name(name: &str) -> String {
    let chars: Vec<char> = name.to_lowercase().chars().collect();
    let spaced: String = chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let decimal_mark = matches!(c, '.' | ',')
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if c.is_alphanumeric() || c == 'µ' || decimal_mark { c } else { ' ' }
        })
        .collect();

    let tokens: Vec<&str> = spaced.split_whitespace().collect();
    tokens
        .iter()
        .enumerate()
        .filter(|&(i, w)| {
            let unit_follows = tokens.get(i + 1).is_some_and(|next| DOSE_WORDS.contains(next));
            !DOSE_WORDS.contains(w) && !is_dose_amount(w) && !(is_quantity(w) && unit_follows)
        })
        .map(|(_, w)| *w)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_quantity(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
}

/// A quantity glued to its unit, e.g. "10mg" or "2.5ml"
fn is_dose_amount(token: &str) -> bool {
    let unit = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ',');
    unit.len() < token.len() && token.starts_with(|c: char| c.is_ascii_digit()) && DOSE_WORDS.contains(&unit)
}

fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

struct CompiledRules<'a> {
    rules: &'a RefinementRules,
    admin: Vec<Regex>,
    measurement: Vec<Regex>,
    value_split: Regex,
}

impl<'a> CompiledRules<'a> {
    fn compile(rules: &'a RefinementRules) -> Result<Self, regex::Error> {
        let admin: Vec<Regex> = rules.admin_patterns.iter().map(|p| Regex::new(p)).collect::<Result<_, _>>()?;
        let measurement: Vec<Regex> = rules
            .measurement_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<_, _>>()?;
        let value_split = Regex::new(
            r"^(?P<name>[^\d:=]+?)\s*[:=]?\s*(?P<value>[<>]?\d+(?:[.,]\d+)?)\s*(?P<unit>\S+)?\s*$",
        )?;

        Ok(Self {
            rules,
            admin,
            measurement,
            value_split,
        })
    }

    fn normalize_unit(&self, unit: &str) -> String {
        let mut out = unit.trim().to_string();
        for (from, to) in &self.rules.unit_replacements {
            out = out.replace(from.as_str(), to);
        }
        out
    }

    fn is_admin(&self, obs: &Observation) -> bool {
        self.admin
            .iter()
            .any(|re| re.is_match(&obs.test_name) || re.is_match(&obs.value))
    }

    fn is_measurement(&self, label: &str) -> bool {
        self.measurement.iter().any(|re| re.is_match(label))
    }

    fn condition_as_observation(&self, condition: &Condition) -> Option<Observation> {
        let caps = self.value_split.captures(condition.label.trim())?;
        Some(Observation {
            test_name: caps.name("name")?.as_str().trim().to_string(),
            value: caps.name("value")?.as_str().to_string(),
            unit: caps.name("unit").map(|u| self.normalize_unit(u.as_str())),
            date: condition.onset_date.clone(),
        })
    }
}

/// Deterministic normalizer applying `RefinementRules` without any service.
#[derive(Debug, Clone, Default)]
pub struct RuleNormalizer;

impl RuleNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&self, record: &MasterRecord, rules: &RefinementRules) -> Result<MasterRecord, regex::Error> {
        let compiled = CompiledRules::compile(rules)?;

        let medications = merge_medications(&record.medications, &compiled);

        let mut med_names = EntityNormalizer::with_synonyms(&rules.medication_synonyms);
        let med_keys: HashSet<String> = medications.iter().map(|m| med_names.normalize(&m.name)).collect();

        let mut moved = Vec::new();
        let mut conditions = Vec::new();
        let mut condition_names = EntityNormalizer::with_synonyms(&rules.condition_synonyms);
        let mut seen_conditions = HashSet::new();

        for condition in &record.conditions {
            if compiled.is_measurement(&condition.label) {
                match compiled.condition_as_observation(condition) {
                    Some(obs) => moved.push(obs),
                    None => tracing::debug!(label = %condition.label, "Dropping measurement typed as condition"),
                }
                continue;
            }
            if med_keys.contains(&med_names.normalize(&condition.label)) {
                continue;
            }
            let key = (condition_names.normalize(&condition.label), condition.onset_date.clone());
            if seen_conditions.insert(key) {
                conditions.push(condition.clone());
            }
        }

        let mut observations = Vec::new();
        let mut seen_observations = HashSet::new();

        for obs in record.observations.iter().chain(moved.iter()) {
            if compiled.is_admin(obs) {
                continue;
            }
            // A dosing line copied from the therapy table, not a lab value
            if !is_measured(obs) && med_keys.contains(&med_names.normalize(&obs.test_name)) {
                continue;
            }

            let mut obs = obs.clone();
            obs.unit = obs.unit.as_deref().map(|u| compiled.normalize_unit(u));

            let key = (
                obs.test_name.trim().to_string(),
                obs.value.trim().to_string(),
                obs.date.as_deref().map(str::trim).map(str::to_string),
            );
            if seen_observations.insert(key) {
                observations.push(obs);
            }
        }

        Ok(MasterRecord {
            patient: record.patient.clone(),
            medications,
            observations,
            conditions,
        })
    }
}

fn merge_medications(raw: &[Medication], compiled: &CompiledRules<'_>) -> Vec<Medication> {
    let mut names = EntityNormalizer::with_synonyms(&compiled.rules.medication_synonyms);
    let mut merged: Vec<Medication> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for med in raw {
        let mut med = med.clone();
        med.dosage = med.dosage.as_deref().map(|d| compiled.normalize_unit(d));

        let key = names.normalize(&med.name);
        match index_by_key.get(&key) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                if detail(&med.dosage) > detail(&existing.dosage) {
                    existing.dosage = med.dosage;
                }
                if existing.timing.is_none() {
                    existing.timing = med.timing;
                }
                // "Brand (Generic)" carries more than either half alone
                if med.name.chars().count() > existing.name.chars().count() {
                    existing.name = med.name;
                }
            }
            None => {
                index_by_key.insert(key, merged.len());
                merged.push(med);
            }
        }
    }

    merged
}

fn is_measured(obs: &Observation) -> bool {
    obs.unit.as_deref().is_some_and(|u| !u.trim().is_empty()) || is_quantity(obs.value.trim())
}

fn detail(dosage: &Option<String>) -> usize {
    dosage.as_deref().map(|d| d.trim().chars().count()).unwrap_or(0)
}

#[async_trait]
impl Normalizer for RuleNormalizer {
    async fn normalize(
        &self,
        record: &MasterRecord,
        rules: &RefinementRules,
    ) -> Result<Option<MasterRecord>, CapabilityError> {
        let refined = self
            .apply(record, rules)
            .map_err(|e| CapabilityError::Service(anyhow::anyhow!("Invalid refinement pattern: {}", e)))?;
        Ok(Some(refined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refine(record: &MasterRecord) -> MasterRecord {
        RuleNormalizer::new().apply(record, &RefinementRules::default()).unwrap()
    }

    #[test]
    fn test_normalization() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize("Bisoprololo"), "bisoprololo");
        assert_eq!(normalizer.normalize("Bisoprololo!"), "bisoprololo");
        assert_eq!(normalizer.normalize("  BISOPROLOLO 1.25 mg "), "bisoprololo");
    }

    #[test]
    fn test_brand_resolves_to_generic() {
        let mut normalizer = EntityNormalizer::with_synonyms(&RefinementRules::default().medication_synonyms);

        assert_eq!(normalizer.normalize("Jumex"), "selegilina");
        assert_eq!(normalizer.normalize("Cardioaspirina (Acido Acetilsalicilico)"), "acido acetilsalicilico");
    }

    #[test]
    fn test_identical_observations_collapse() {
        let creat = Observation::new("Creatinina", "1.2", Some("mg/dL"), Some("2024-01-01"));
        let record = MasterRecord {
            observations: vec![creat.clone(), creat.clone()],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        assert_eq!(refined.observations, vec![creat]);
    }

    #[test]
    fn test_same_test_on_different_dates_survives() {
        let record = MasterRecord {
            observations: vec![
                Observation::new("Creatinina", "1.2", Some("mg/dL"), Some("2024-01-01")),
                Observation::new("Creatinina", "1.2", Some("mg/dL"), Some("2024-02-01")),
            ],
            ..MasterRecord::default()
        };

        assert_eq!(refine(&record).observations.len(), 2);
    }

    #[test]
    fn test_brand_and_generic_merge_keeps_detailed_dosage() {
        let record = MasterRecord {
            medications: vec![
                Medication::new("Selegilina", Some("10mg")),
                Medication::new("JUMEX", Some("10mg, 1 compressa al mattino")),
                Medication::new("Ramipril", Some("5mg")),
            ],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        assert_eq!(refined.medications.len(), 2);
        assert_eq!(refined.medications[0].dosage.as_deref(), Some("10mg, 1 compressa al mattino"));
        assert_eq!(refined.medications[1].name, "Ramipril");
    }

    #[test]
    fn test_measurement_condition_moves_to_observations() {
        let record = MasterRecord {
            conditions: vec![
                Condition::new("Glicemia 126 mg/dL", Some("2024-03-02")),
                Condition::new("Ipertensione", None),
            ],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        assert_eq!(refined.conditions.len(), 1);
        assert_eq!(refined.observations.len(), 1);
        assert_eq!(refined.observations[0].test_name, "Glicemia");
        assert_eq!(refined.observations[0].value, "126");
        assert_eq!(refined.observations[0].date.as_deref(), Some("2024-03-02"));
    }

    #[test]
    fn test_admin_metadata_and_therapy_artifacts_removed() {
        let record = MasterRecord {
            medications: vec![Medication::new("JARDIANCE", Some("10mg"))],
            observations: vec![
                Observation::new("Pagina", "2 di 5", None, None),
                Observation::new("JARDIANCE", "1 cp", None, None),
                Observation::new("Emoglobina", "13.5", Some("g/dL"), None),
            ],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        assert_eq!(refined.observations.len(), 1);
        assert_eq!(refined.observations[0].test_name, "Emoglobina");
    }

    #[test]
    fn test_unit_artifacts_fixed() {
        let record = MasterRecord {
            observations: vec![Observation::new("Vitamina B12", "350", Some("Âµg/L"), None)],
            medications: vec![Medication::new("Cianocobalamina", Some("1000 mcg"))],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        assert_eq!(refined.observations[0].unit.as_deref(), Some("µg/L"));
        assert_eq!(refined.medications[0].dosage.as_deref(), Some("1000 µg"));
    }

    #[test]
    fn test_identifiers_with_digits_stay_distinct() {
        let mut normalizer = EntityNormalizer::new();

        assert_eq!(normalizer.normalize("Vitamina D3 25000 UI"), "vitamina d3");
        assert_eq!(normalizer.normalize("Vitamina B12 1000mcg"), "vitamina b12");
        assert_eq!(normalizer.normalize("Diabete mellito tipo 1"), "diabete mellito tipo 1");
    }

    #[test]
    fn test_distinct_vitamins_keep_their_own_dosage_and_labs() {
        let record = MasterRecord {
            medications: vec![
                Medication::new("Vitamina D3", Some("25000 UI")),
                Medication::new("Vitamina B12", Some("1000 mcg")),
            ],
            observations: vec![Observation::new("Vitamina B12", "350", Some("pg/mL"), Some("2024-01-10"))],
            ..MasterRecord::default()
        };

        let refined = refine(&record);
        let meds: Vec<(&str, Option<&str>)> = refined
            .medications
            .iter()
            .map(|m| (m.name.as_str(), m.dosage.as_deref()))
            .collect();
        assert_eq!(meds, vec![("Vitamina D3", Some("25000 UI")), ("Vitamina B12", Some("1000 µg"))]);
        assert_eq!(refined.observations.len(), 1);
        assert_eq!(refined.observations[0].value, "350");
    }

    #[test]
    fn test_diabetes_types_are_not_merged() {
        let record = MasterRecord {
            conditions: vec![
                Condition::new("Diabete mellito tipo 2", None),
                Condition::new("Diabete mellito tipo 1", None),
                Condition::new("DM2", None),
            ],
            ..MasterRecord::default()
        };

        let labels: Vec<String> = refine(&record).conditions.into_iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["Diabete mellito tipo 2", "Diabete mellito tipo 1"]);
    }

    #[test]
    fn test_similar_wording_is_not_a_synonym() {
        let record = MasterRecord {
            conditions: vec![
                Condition::new("Frattura collo femore destro", Some("2023-05-01")),
                Condition::new("Frattura collo femore sinistro", Some("2023-05-01")),
            ],
            ..MasterRecord::default()
        };

        assert_eq!(refine(&record).conditions.len(), 2);
    }

    #[test]
    fn test_name_with_two_aliases_resolves_the_same_every_time() {
        let groups = RefinementRules::default().medication_synonyms;
        let keys: HashSet<String> = (0..200)
            .map(|_| EntityNormalizer::with_synonyms(&groups).normalize("Cardioaspirina + Pantorc"))
            .collect();

        assert_eq!(keys.len(), 1);
        assert!(keys.contains("acido acetilsalicilico"));
    }
}
