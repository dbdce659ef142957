use crate::schema::SectionType;

fn section_focus(section: SectionType) -> &'static str {
    match section {
        SectionType::Medications => {
            r#"Extract ONLY medications into "medications".
- If both a brand name and an active ingredient appear, put both in "name" (e.g. "Cardioaspirina (Acido Acetilsalicilico)").
- "dosage": quantity, unit and frequency (e.g. "100mg, 1 compressa").
- "timing": time of administration if present (e.g. "08:00").
- "status": "active" unless the text says the therapy was suspended or completed."#
        }
        SectionType::Observations => {
            r#"Extract ONLY laboratory results and vital signs into "observations".
- If the content is a table with dates in the column headers, every filled cell is one observation: [row: test] x [column: date].
- Look for a "UM" or "Unità" column to fill "unit".
- Keep decimals exactly as written."#
        }
        SectionType::Conditions => {
            r#"Extract ONLY diagnoses and clinical events into "conditions".
- "label": the diagnosis or event name.
- "onset_date": when it was first diagnosed, if stated.
- Do NOT list lab measurements or medications as conditions."#
        }
    }
}

pub fn build_extraction_prompt(section: SectionType, text: &str, identifier: &str) -> String {
    format!(
        r#"ROLE: high-fidelity clinical data extractor.
TASK: extract {section} from the document "{identifier}".
Keep clinical terms in the language of the document.

{focus}

Also fill "patient" with the patient's full name and tax id (codice fiscale) if they appear. Never invent a name.

NORMALIZATION RULES:
- Dates: DD/MM/YYYY. Expand two-digit years (e.g. '25' -> '2025').
- Ignore page numbers, hospital headers and administrative notes.

SCHEMA:
{{
  "patient": {{"name": "FULL NAME or null", "tax_id": "TAX ID or null"}},
  "medications": [{{"name": "", "dosage": "", "timing": "", "status": "active"}}],
  "observations": [{{"test_name": "", "value": "", "unit": "", "date": ""}}],
  "conditions": [{{"label": "", "onset_date": ""}}]
}}

Output ONLY the JSON object, no markdown, no explanations.

CONTENT:
{text}

JSON OUTPUT:"#,
        section = section.as_str().to_uppercase(),
        identifier = identifier,
        focus = section_focus(section),
        text = text,
    )
}

pub fn build_reconcile_prompt(section: SectionType, raw_json: &str) -> String {
    let instruction = match section {
        SectionType::Medications => {
            "Reconcile and deduplicate these medications (merge brand and molecule). \
             Do NOT drop a record unless it is a certain duplicate."
        }
        SectionType::Conditions => {
            "Reconcile these clinical diagnoses. Merge synonyms into one entry."
        }
        SectionType::Observations => {
            "Deduplicate these observations. Only merge entries identical in test, value and date."
        }
    };

    format!(
        r#"{instruction}

Return a JSON object with a single key "{key}" holding the reconciled list, using the same item schema as the input.
Output ONLY the JSON object.

INPUT:
{raw_json}

JSON OUTPUT:"#,
        instruction = instruction,
        key = section.as_str(),
        raw_json = raw_json,
    )
}

pub fn build_refine_prompt(rules: &[String], record_json: &str) -> String {
    let numbered: Vec<String> = rules
        .iter()
        .enumerate()
        .map(|(i, rule)| format!("{}. {}", i + 1, rule))
        .collect();

    format!(
        r#"You are a clinical data architect. Turn this fragmented record into a clean, high-fidelity record.

TASKS:
{rules}

Return the whole record as JSON with keys "patient", "medications", "observations", "conditions", using the same item schema as the input.
Output ONLY the JSON object.

RECORD:
{record_json}

JSON OUTPUT:"#,
        rules = numbered.join("\n"),
        record_json = record_json,
    )
}

pub fn build_summary_prompt(record_json: &str) -> String {
    format!(
        r#"TASK: clinical summary for a care agent.
Analyze the record and produce a structured summary in the language of the record.
- "snapshot": 2-3 sentences on the current health state and brief history.
- "active_medications": drugs CURRENTLY in use.
- "key_findings": critical lab trends or diagnoses.
- "recent_vitals": latest relevant lab values and vitals (e.g. Creatinina, Glicemia, Colesterolo) as name -> "value unit (date)".

SCHEMA:
{{"snapshot": "", "active_medications": [], "key_findings": [], "recent_vitals": {{}}}}

Output ONLY the JSON object.

RECORD:
{record_json}

JSON OUTPUT:"#,
        record_json = record_json,
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_targets_section() {
        let prompt = build_extraction_prompt(SectionType::Observations, "Creatinina 1.2", "labs.xlsx");
        assert!(prompt.contains("OBSERVATIONS"));
        assert!(prompt.contains("labs.xlsx"));
        assert!(prompt.contains("Creatinina 1.2"));
    }

    #[test]
    fn test_refine_prompt_numbers_rules() {
        let rules = vec!["first".to_string(), "second".to_string()];
        let prompt = build_refine_prompt(&rules, "{}");
        assert!(prompt.contains("1. first\n2. second"));
    }
}
