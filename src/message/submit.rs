use crate::verdict::SubmissionStatus;
use reqwest::multipart;
use serde::Deserialize;

#[derive(Clone, Debug)]
pub enum Source {
    Code(String),
    File { file_name: String, contents: Vec<u8> },
}

/// Body of a submit request.
#[derive(Clone, Debug)]
pub struct SubmitPayload {
    pub case_id: String,
    pub language_id: i64,
    pub source: Source,
    pub contest_id: Option<String>,
    pub class_transaction_id: Option<String>,
}

impl SubmitPayload {
    pub fn into_form(self) -> multipart::Form {
        let mut form = multipart::Form::new()
            .text("case_id", self.case_id)
            .text("language_id", self.language_id.to_string());

        form = match self.source {
            Source::Code(code) => form.text("source_code", code),
            Source::File {
                file_name,
                contents,
            } => form.part(
                "source_file",
                multipart::Part::bytes(contents).file_name(file_name),
            ),
        };

        if let Some(contest_id) = self.contest_id {
            form = form.text("contest_id", contest_id);
        }
        if let Some(class_transaction_id) = self.class_transaction_id {
            form = form.text("class_transaction_id", class_transaction_id);
        }
        form
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: String,
    pub status: SubmissionStatus,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
