use tracing::{debug, error, info};

use crate::api::{Backend, ChatReply, ChatRequest, UploadFile, UploadReply};
use crate::error::VoxchatError;
use crate::message::{InputType, Message, Speaker};

pub const CHAT_APOLOGY: &str = "Sorry, I encountered an error. Please try again.";
pub const UPLOAD_APOLOGY: &str = "Sorry, there was an error uploading your file.";

pub fn upload_summary(reply: &UploadReply) -> String {
    format!(
        "File uploaded successfully! Found {} rows with columns: {}",
        reply.rows_count,
        reply.data_preview.columns.join(", ")
    )
}

/// Backend-issued session id. Set once, never overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session(Option<String>);

impl Session {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Take `candidate` if no session is known yet. Empty ids don't count.
    /// Returns true when the session was adopted by this call.
    pub fn adopt(&mut self, candidate: Option<&str>) -> bool {
        match (&self.0, candidate) {
            (None, Some(id)) if !id.is_empty() => {
                self.0 = Some(id.to_string());
                true
            }
            _ => false,
        }
    }
}

/// A chat request in flight, tagged with its submission number.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub seq: u64,
    pub request: ChatRequest,
}

#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub seq: u64,
    pub file_name: String,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    session: Session,
    pending: bool,
    uploaded_file: Option<String>,
    next_message: u64,
    next_submission: u64,
    user_id: Option<String>,
}

impl Conversation {
    pub fn new(user_id: Option<String>) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    /// Continue a session issued earlier, e.g. by a previous CLI run.
    pub fn resume(&mut self, session_id: &str) -> bool {
        self.session.adopt(Some(session_id))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn uploaded_file(&self) -> Option<&str> {
        self.uploaded_file.as_deref()
    }

    fn push(&mut self, speaker: Speaker, text: impl Into<String>, input_type: InputType) {
        self.next_message += 1;
        let message = Message::new(self.next_message, speaker, text, input_type);
        debug!("Appended {:?} message {}", message.speaker, message.id);
        self.messages.push(message);
    }

    fn next_submission(&mut self) -> u64 {
        self.next_submission += 1;
        self.next_submission
    }

    /// Append the user's turn and build the request for it. Blank input
    /// appends nothing and yields `None`.
    pub fn begin_exchange(&mut self, text: &str, input_type: InputType) -> Option<Exchange> {
        if text.trim().is_empty() {
            debug!("Ignoring blank {} submission", input_type);
            return None;
        }

        self.push(Speaker::User, text, input_type);
        self.pending = true;
        let seq = self.next_submission();
        info!("Submitting {} message #{}", input_type, seq);

        Some(Exchange {
            seq,
            request: ChatRequest {
                message: text.to_string(),
                session_id: self.session.id().map(str::to_string),
                user_id: self.user_id.clone(),
                input_type: Some(input_type),
            },
        })
    }

    pub fn finish_exchange(&mut self, exchange: Exchange, outcome: Result<ChatReply, VoxchatError>) {
        match outcome {
            Ok(reply) => {
                if self.session.adopt(reply.session_id.as_deref()) {
                    info!("Session established: {}", reply.session_id.as_deref().unwrap_or_default());
                }
                info!("Reply to message #{} received", exchange.seq);
                self.push(Speaker::Assistant, reply.response, InputType::Text);
            }
            Err(e) => {
                error!("Chat request #{} failed: {}", exchange.seq, e);
                self.push(Speaker::Assistant, CHAT_APOLOGY, InputType::Text);
            }
        }
        self.pending = false;
    }

    pub fn begin_upload(&mut self, file_name: &str) -> UploadTicket {
        self.push(Speaker::User, format!("Uploaded file: {}", file_name), InputType::File);
        self.pending = true;
        let seq = self.next_submission();
        info!("Uploading {} as submission #{}", file_name, seq);

        UploadTicket {
            seq,
            file_name: file_name.to_string(),
        }
    }

    pub fn finish_upload(&mut self, ticket: UploadTicket, outcome: Result<UploadReply, VoxchatError>) {
        match outcome {
            Ok(reply) => {
                info!("Upload #{} accepted: {} rows", ticket.seq, reply.rows_count);
                self.push(Speaker::Assistant, upload_summary(&reply), InputType::Text);
                self.uploaded_file = Some(ticket.file_name);
            }
            Err(e) => {
                error!("Upload #{} of {} failed: {}", ticket.seq, ticket.file_name, e);
                self.push(Speaker::Assistant, UPLOAD_APOLOGY, InputType::Text);
            }
        }
        self.pending = false;
    }

    /// Run one full exchange against `backend`. Returns false if the text
    /// was blank and nothing happened.
    pub async fn submit(&mut self, backend: &dyn Backend, text: &str, input_type: InputType) -> bool {
        let Some(exchange) = self.begin_exchange(text, input_type) else {
            return false;
        };
        let outcome = backend.send_message(exchange.request.clone()).await;
        self.finish_exchange(exchange, outcome);
        true
    }

    pub async fn submit_text(&mut self, backend: &dyn Backend, text: &str) -> bool {
        self.submit(backend, text, InputType::Text).await
    }

    pub async fn submit_voice(&mut self, backend: &dyn Backend, transcript: &str) -> bool {
        self.submit(backend, transcript, InputType::Voice).await
    }

    pub async fn upload_file(&mut self, backend: &dyn Backend, file: UploadFile) {
        let ticket = self.begin_upload(&file.file_name);
        let outcome = backend.upload_file(file).await;
        self.finish_upload(ticket, outcome);
    }

    /// The assistant's most recent reply, if any.
    pub fn last_reply(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }
}
