//! Core data model types for ktiger.
//!
//! These mirror the JSON payloads of the exam backend (camelCase field
//! names, numeric identifiers) plus the locally persisted resume record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying numeric value.
            #[must_use]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of one user's run through an exam.
    AttemptId
);
numeric_id!(
    /// Identifier of an exam.
    ExamId
);
numeric_id!(
    /// Identifier of a user.
    UserId
);
numeric_id!(
    /// Identifier of an exam section.
    SectionId
);
numeric_id!(
    /// Identifier of a question.
    QuestionId
);
numeric_id!(
    /// Identifier of one choice of a CHOICE question.
    ChoiceId
);
numeric_id!(
    /// Identifier shared by questions that form one group (shared passage, audio or image).
    GroupId
);

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

/// Server-side status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

/// One user's run through an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub exam_id: ExamId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub status: AttemptStatus,
    /// Server timestamp, passed through verbatim.
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub exam_title: Option<String>,
}

/// Entry of the active exam list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub exam_id: ExamId,
    pub title: String,
    #[serde(default)]
    pub exam_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
}

// ---------------------------------------------------------------------------
// Sections and questions
// ---------------------------------------------------------------------------

/// Skill type of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionType {
    Listening,
    Reading,
    Writing,
    #[serde(other)]
    Other,
}

impl SectionType {
    /// Label shown in section headers and transition prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            SectionType::Listening => "Listening",
            SectionType::Reading => "Reading",
            SectionType::Writing => "Writing",
            SectionType::Other => "Section",
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// An ordered, timed partition of an exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub section_id: SectionId,
    /// 1-based traversal order.
    pub section_order: u32,
    pub section_type: SectionType,
    pub duration_minutes: u32,
    #[serde(default)]
    pub total_questions: u32,
    /// Section-wide listening track.
    #[serde(default)]
    pub audio_url: Option<String>,
}

impl Section {
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Choice,
    Short,
    Essay,
}

impl QuestionType {
    pub fn is_free_text(&self) -> bool {
        matches!(self, QuestionType::Short | QuestionType::Essay)
    }
}

/// One option of a CHOICE question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub choice_id: ChoiceId,
    pub choice_label: String,
    pub choice_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question_id: QuestionId,
    /// Display order, unique within the section.
    pub question_number: u32,
    pub question_type: QuestionType,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub question_text: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub passage_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Answers
// ---------------------------------------------------------------------------

/// An answer as returned by `GET /user-answers/attempt/{attemptId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnswer {
    pub question_id: QuestionId,
    #[serde(default)]
    pub choice_id: Option<ChoiceId>,
    #[serde(default)]
    pub answer_text: Option<String>,
}

/// Body of `POST /user-answers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAnswerRequest {
    pub attempt_id: AttemptId,
    pub question_id: QuestionId,
    #[serde(flatten)]
    pub value: AnswerPayload,
}

/// The answer part of a save request.
///
/// `Choice { choice_id: None }` is the explicit "unset" write of a deselected choice and
/// serializes as `"choiceId": null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Text {
        #[serde(rename = "answerText")]
        answer_text: String,
    },
    Choice {
        #[serde(rename = "choiceId")]
        choice_id: Option<ChoiceId>,
    },
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Per-section part of a scored result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResult {
    #[serde(default)]
    pub section_type: Option<SectionType>,
    #[serde(default)]
    pub correct_count: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Scored result of a submitted attempt, computed server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    #[serde(default)]
    pub attempt_id: Option<AttemptId>,
    #[serde(default)]
    pub exam_id: Option<ExamId>,
    #[serde(default)]
    pub total_score: Option<f64>,
    #[serde(default)]
    pub correct_answers: Option<u32>,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub section_results: Vec<SectionResult>,
    /// Fields the client does not interpret (per-question review data etc.).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// TOPIK level band of a total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopikLevel {
    Level(u8),
    NotPassed,
}

impl TopikLevel {
    pub fn from_total_score(score: f64) -> Self {
        match score {
            s if s >= 230.0 => TopikLevel::Level(6),
            s if s >= 190.0 => TopikLevel::Level(5),
            s if s >= 150.0 => TopikLevel::Level(4),
            s if s >= 120.0 => TopikLevel::Level(3),
            _ => TopikLevel::NotPassed,
        }
    }
}

impl fmt::Display for TopikLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopikLevel::Level(n) => write!(f, "TOPIK {n}"),
            TopikLevel::NotPassed => write!(f, "Not passed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted resume record
// ---------------------------------------------------------------------------

/// Local resume state of the single in-progress attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPosition {
    pub attempt_id: AttemptId,
    #[serde(default)]
    pub exam_title: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub current_section_index: usize,
    #[serde(default)]
    pub current_question_index: usize,
    /// Remaining time of the section at `current_section_index`.
    #[serde(default, rename = "timeLeft")]
    pub time_left_seconds: Option<u64>,
}

impl PersistedPosition {
    pub fn fresh(attempt_id: AttemptId, exam_title: impl Into<String>) -> Self {
        Self {
            attempt_id,
            exam_title: exam_title.into(),
            started_at: Utc::now(),
            current_section_index: 0,
            current_question_index: 0,
            time_left_seconds: None,
        }
    }
}

/// Default title used when the backend does not send one.
pub const DEFAULT_EXAM_TITLE: &str = "TOPIK exam";

/// Remaining time below which the clock is rendered as a warning.
pub const TIME_WARNING_THRESHOLD_SECS: u64 = 300;

/// Format seconds as `MM:SS`; minutes are not wrapped into hours.
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn is_time_low(seconds: u64) -> bool {
    seconds < TIME_WARNING_THRESHOLD_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_deserializes_from_backend_json() {
        let json = serde_json::json!({
            "questionId": 11,
            "questionNumber": 3,
            "questionType": "CHOICE",
            "groupId": 2,
            "choices": [
                {"choiceId": 1, "choiceLabel": "①", "choiceText": "가"},
                {"choiceId": 2, "choiceLabel": "②", "choiceText": "나"}
            ],
            "audioUrl": "https://cdn.example/q3.mp3"
        });
        let q: Question = serde_json::from_value(json).unwrap();
        assert_eq!(q.question_id, QuestionId::new(11));
        assert_eq!(q.group_id, Some(GroupId::new(2)));
        assert_eq!(q.choices.len(), 2);
        assert!(q.passage_text.is_none());
    }

    #[test]
    fn unknown_section_type_maps_to_other() {
        let s: Section = serde_json::from_value(serde_json::json!({
            "sectionId": 1,
            "sectionOrder": 1,
            "sectionType": "SPEAKING",
            "durationMinutes": 40
        }))
        .unwrap();
        assert_eq!(s.section_type, SectionType::Other);
        assert_eq!(s.duration_secs(), 2400);
    }

    #[test]
    fn deselect_request_serializes_null_choice() {
        let req = SaveAnswerRequest {
            attempt_id: AttemptId::new(7),
            question_id: QuestionId::new(3),
            value: AnswerPayload::Choice { choice_id: None },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"attemptId": 7, "questionId": 3, "choiceId": null})
        );
    }

    #[test]
    fn text_request_serializes_answer_text() {
        let req = SaveAnswerRequest {
            attempt_id: AttemptId::new(7),
            question_id: QuestionId::new(4),
            value: AnswerPayload::Text {
                answer_text: "저는 학생입니다".into(),
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["answerText"], "저는 학생입니다");
        assert!(v.get("choiceId").is_none());
    }

    #[test]
    fn persisted_position_uses_time_left_key() {
        let mut pos = PersistedPosition::fresh(AttemptId::new(1), "Mock TOPIK II");
        pos.time_left_seconds = Some(45);
        let v = serde_json::to_value(&pos).unwrap();
        assert_eq!(v["timeLeft"], 45);
        assert_eq!(v["currentSectionIndex"], 0);
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(110 * 60), "110:00");
        assert!(is_time_low(299));
        assert!(!is_time_low(300));
    }

    #[test]
    fn topik_level_bands() {
        assert_eq!(TopikLevel::from_total_score(231.0), TopikLevel::Level(6));
        assert_eq!(TopikLevel::from_total_score(190.0), TopikLevel::Level(5));
        assert_eq!(TopikLevel::from_total_score(150.0), TopikLevel::Level(4));
        assert_eq!(TopikLevel::from_total_score(120.0), TopikLevel::Level(3));
        assert_eq!(TopikLevel::from_total_score(119.5), TopikLevel::NotPassed);
        assert_eq!(TopikLevel::Level(4).to_string(), "TOPIK 4");
    }

    #[test]
    fn result_keeps_unknown_fields() {
        let r: ExamResult = serde_json::from_value(serde_json::json!({
            "examId": 5,
            "totalScore": 182.0,
            "sectionResults": [{"sectionType": "READING", "correctCount": 40}],
            "questions": []
        }))
        .unwrap();
        assert_eq!(r.section_results.len(), 1);
        assert!(r.extra.contains_key("questions"));
    }
}
