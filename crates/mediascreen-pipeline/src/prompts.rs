//! Stage questions and the prompt wrapped around them for LLM-backed oracles.

use chrono::NaiveDate;

use crate::identity::ApplicantIdentity;
use crate::stage::Stage;

const ARTICLE_LANGUAGE_NOTE: &str = "The article may be written in any language or script. \
Read it in its original language and answer in English.";

/// The stage-specific question asked of the oracle.
pub fn stage_question(
    stage: Stage,
    applicant: &ApplicantIdentity,
    as_of: NaiveDate,
    age_tolerance_years: u32,
) -> String {
    let name = applicant.full_name();
    let dob = applicant.date_of_birth().format("%Y-%m-%d");
    match stage {
        Stage::NamePresence => format!(
            "Is \"{name}\", or an unmistakable variant of it (nickname such as \"Bill\" for \
             \"William\", reordered given and family names, transliteration into another script), \
             mentioned in the article?"
        ),
        Stage::AgeVerification => format!(
            "The article mentions \"{name}\". The applicant was born on {dob}, which makes them \
             {age} years old on {as_of}. Does any age or date of birth the article gives for this \
             person agree with that, allowing a difference of up to {age_tolerance_years} year(s) \
             for rounding or an older publication date? If the article states no age or date of \
             birth at all, answer true.",
            age = applicant.age_on(as_of),
            as_of = as_of.format("%Y-%m-%d"),
        ),
        Stage::DetailVerification => format!(
            "The article mentions \"{name}\" and nothing in it contradicts a date of birth of \
             {dob}. Using dates of birth, ages, locations, occupations, employers and any other \
             strong identifiers tied to that name, is this the same person? Answer \"Match\" only \
             with positive corroboration, \"Non-Match\" only with explicit contradicting evidence, \
             and \"Review Required\" when the name matches but nothing else settles it."
        ),
        Stage::SentimentAssessment => format!(
            "In a regulated financial-services compliance context, is the coverage of \"{name}\" \
             positive, negative or neutral? Treat lawsuits, investigations, fraud, sanctions, \
             bankruptcies, penalties and criminal allegations as negative even when reported in \
             a matter-of-fact tone."
        ),
    }
}

/// JSON shape the model must reply with for `stage`.
pub fn response_schema(stage: Stage) -> &'static str {
    match stage {
        Stage::NamePresence => {
            r#"{"name_is_present": true | false, "explanation": "<one or two sentences>"}"#
        }
        Stage::AgeVerification => {
            r#"{"age_matches": true | false, "explanation": "<what age information was found and how it compares>"}"#
        }
        Stage::DetailVerification => {
            r#"{"decision": "Match" | "Non-Match" | "Review Required", "explanation": "<step-by-step justification>"}"#
        }
        Stage::SentimentAssessment => {
            r#"{"sentiment": "Positive" | "Negative" | "Neutral", "explanation": "<brief justification>"}"#
        }
    }
}

pub fn system_prompt() -> String {
    format!(
        "You are a careful multilingual analyst supporting adverse-media screening for a \
         regulated financial institution. {ARTICLE_LANGUAGE_NOTE} Reply with a single JSON \
         object and nothing else."
    )
}

/// User message: question, applicant, article, and the reply schema.
pub fn user_prompt(stage: Stage, question: &str, applicant: &ApplicantIdentity, article_text: &str) -> String {
    format!(
        "Stage: {stage}\n\
         Applicant name: {name}\n\
         Applicant date of birth: {dob}\n\n\
         Question: {question}\n\n\
         Article text:\n\"\"\"\n{article_text}\n\"\"\"\n\n\
         Respond with exactly this JSON shape:\n{schema}",
        name = applicant.full_name(),
        dob = applicant.date_of_birth().format("%Y-%m-%d"),
        schema = response_schema(stage),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn applicant() -> ApplicantIdentity {
        ApplicantIdentity::parse("Jane Smith", "1990-05-12").unwrap()
    }

    #[test]
    fn age_question_carries_computed_age_and_tolerance() {
        let as_of = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
        let q = stage_question(Stage::AgeVerification, &applicant(), as_of, 1);
        assert!(q.contains("33 years old on 2023-09-01"));
        assert!(q.contains("up to 1 year(s)"));
        assert!(q.contains("1990-05-12"));
    }

    #[test]
    fn every_stage_has_a_question_and_schema() {
        let as_of = NaiveDate::from_ymd_opt(2023, 9, 1).unwrap();
        for stage in Stage::ALL {
            let q = stage_question(stage, &applicant(), as_of, 1);
            assert!(q.contains("Jane Smith"), "{stage}");
            assert!(response_schema(stage).contains("explanation"));
        }
    }

    #[test]
    fn user_prompt_embeds_article_and_schema() {
        let p = user_prompt(
            Stage::SentimentAssessment,
            "Is it negative?",
            &applicant(),
            "Jane Smith was fined.",
        );
        assert!(p.contains("Stage: sentiment_assessment"));
        assert!(p.contains("Jane Smith was fined."));
        assert!(p.contains("\"sentiment\""));
    }
}
