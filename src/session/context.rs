use serde::{Deserialize, Serialize};

/// One interview question, supplied by case generation and never created
/// or mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question_text: String,
    pub question_type: String,
    pub difficulty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_criteria: Option<Vec<String>>,
    /// Suggested time for this question, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_allocation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
}

/// Everything the engine knows about the interview being conducted.
///
/// Owned by the orchestrator; mutated only through `apply` with an explicit
/// patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewContext {
    pub interview_id: String,
    pub job_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub focus_areas: Vec<String>,
    pub difficulty: String,
    pub questions: Vec<Question>,
    pub current_question_index: usize,
}

/// Partial update merged into an existing context
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPatch {
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub focus_areas: Option<Vec<String>>,
    pub difficulty: Option<String>,
    pub questions: Option<Vec<Question>>,
    pub current_question_index: Option<usize>,
}

impl InterviewContext {
    pub fn apply(&mut self, patch: ContextPatch) {
        if let Some(job_title) = patch.job_title {
            self.job_title = job_title;
        }
        if let Some(company_name) = patch.company_name {
            self.company_name = Some(company_name);
        }
        if let Some(focus_areas) = patch.focus_areas {
            self.focus_areas = focus_areas;
        }
        if let Some(difficulty) = patch.difficulty {
            self.difficulty = difficulty;
        }
        if let Some(questions) = patch.questions {
            self.questions = questions;
        }
        if let Some(index) = patch.current_question_index {
            self.current_question_index = index;
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    /// Render the system instruction sent in the setup frame.
    pub fn system_instruction(&self) -> String {
        let mut out = format!(
            "You are conducting a {} interview for the role of {}",
            self.difficulty, self.job_title
        );

        if let Some(company) = &self.company_name {
            out.push_str(&format!(" at {company}"));
        }
        out.push('.');

        if !self.focus_areas.is_empty() {
            out.push_str(&format!(" Focus areas: {}.", self.focus_areas.join(", ")));
        }

        if let Some(question) = self.current_question() {
            out.push_str(&format!(
                " The current question ({} of {}) is: {}",
                self.current_question_index + 1,
                self.questions.len(),
                question.question_text
            ));
            if let Some(criteria) = &question.evaluation_criteria {
                if !criteria.is_empty() {
                    out.push_str(&format!(
                        " Evaluate the answer against: {}.",
                        criteria.join("; ")
                    ));
                }
            }
        }

        out.push_str(
            " Speak naturally, ask one question at a time, and let the candidate finish before responding.",
        );

        out
    }

    /// Short note sent mid-session when the context changes.
    pub fn update_note(&self) -> String {
        match self.current_question() {
            Some(question) => format!(
                "[context update] Now on question {} of {}: {}",
                self.current_question_index + 1,
                self.questions.len(),
                question.question_text
            ),
            None => format!(
                "[context update] Interview for {} continues; no scripted question is active.",
                self.job_title
            ),
        }
    }
}
