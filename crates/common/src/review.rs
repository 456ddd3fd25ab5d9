//! Proposal review state machine
//!
//! Tracks one generation session: the source text, the proposals returned
//! by the generator and the user's accept/edit/reject decisions. The state
//! is an immutable value; [`reduce`] returns the next state for an action.
//! Saving projects the proposals into create-batches, one per source, and
//! hands them to the [`FlashcardService`].

use crate::db::models::FlashcardSource;
use crate::errors::AppError;
use crate::flashcards::FlashcardService;
use crate::generation::GenerateCreateResponse;
use crate::validation::{self, FlashcardCreateDto, FlashcardsCreateCommand};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

pub const NOTHING_TO_SAVE: &str = "No flashcards to save.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewConfig {
    /// Initial `is_accepted` of freshly generated proposals
    pub proposals_start_accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalState {
    pub front: String,
    pub back: String,
    pub source: FlashcardSource,
    pub is_accepted: bool,
    pub is_edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    SourceTextChanged(String),
    GenerationSucceeded(GenerateCreateResponse),
    GenerationFailed(String),
    Accept(usize),
    Edit { index: usize, front: String, back: String },
    Reject(usize),
    SaveSucceeded { saved: usize },
    SaveFailed(String),
    /// Some batches were stored before a later one failed; `saved` holds
    /// the proposal indices already persisted
    SavePartiallyFailed { saved: Vec<usize>, message: String },
    DismissError,
    DismissNotice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    All,
    AcceptedOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewState {
    pub source_text: String,
    pub generation_id: Option<i64>,
    pub proposals: Vec<ProposalState>,
    /// Error banner
    pub error: Option<String>,
    /// Success banner
    pub notice: Option<String>,
    pub config: ReviewConfig,
}

impl ReviewState {
    pub fn new(config: ReviewConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.proposals.iter().filter(|p| p.is_accepted).count()
    }

    pub fn total_count(&self) -> usize {
        self.proposals.len()
    }

    /// The source text has a length the generator accepts
    pub fn can_generate(&self) -> bool {
        validation::source_text_length_ok(&self.source_text)
    }

    /// Project proposals into create payloads for this session's generation
    pub fn prepare_for_save(&self, only_accepted: bool) -> Vec<FlashcardCreateDto> {
        self.proposals
            .iter()
            .filter(|p| !only_accepted || p.is_accepted)
            .map(|p| FlashcardCreateDto {
                front: p.front.clone(),
                back: p.back.clone(),
                source: if p.is_edited {
                    FlashcardSource::AiEdited
                } else {
                    FlashcardSource::AiFull
                },
                generation_id: self.generation_id,
            })
            .collect()
    }

    /// Persist the projection and return the resulting state
    ///
    /// A batch holds a single source, so edited and unedited proposals are
    /// sent as separate batches sharing the session's generation. Nothing is
    /// sent when the projection is empty or any batch fails validation.
    pub async fn save(&self, service: &FlashcardService, user_id: Uuid, mode: SaveMode) -> ReviewState {
        let only_accepted = mode == SaveMode::AcceptedOnly;
        let selected = self
            .proposals
            .iter()
            .enumerate()
            .filter(|(_, p)| !only_accepted || p.is_accepted)
            .map(|(index, _)| index);
        let flashcards = self.prepare_for_save(only_accepted);
        if flashcards.is_empty() {
            return reduce(self, ReviewAction::SaveFailed(NOTHING_TO_SAVE.to_string()));
        }

        let mut batches = Vec::new();
        for (indices, flashcards) in batches_by_source(selected.zip(flashcards)) {
            let command = FlashcardsCreateCommand { flashcards };
            if let Err(errors) = command.validate() {
                let message = describe(&validation::into_app_error(errors));
                return reduce(self, ReviewAction::SaveFailed(message));
            }
            batches.push((indices, command));
        }

        let mut saved_indices = Vec::new();
        let mut saved = 0;
        for (indices, command) in batches {
            match service.create_flashcards(user_id, command.flashcards).await {
                Ok(created) => {
                    saved += created.flashcards.len();
                    saved_indices.extend(indices);
                }
                Err(err) if saved_indices.is_empty() => {
                    return reduce(self, ReviewAction::SaveFailed(err.to_string()));
                }
                Err(err) => {
                    return reduce(
                        self,
                        ReviewAction::SavePartiallyFailed {
                            saved: saved_indices,
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        reduce(self, ReviewAction::SaveSucceeded { saved })
    }
}

/// Group create payloads by source, keeping first-seen order
fn batches_by_source(
    items: impl IntoIterator<Item = (usize, FlashcardCreateDto)>,
) -> Vec<(Vec<usize>, Vec<FlashcardCreateDto>)> {
    let mut batches: Vec<(FlashcardSource, Vec<usize>, Vec<FlashcardCreateDto>)> = Vec::new();
    for (index, dto) in items {
        match batches.iter_mut().find(|(source, ..)| *source == dto.source) {
            Some((_, indices, dtos)) => {
                indices.push(index);
                dtos.push(dto);
            }
            None => batches.push((dto.source, vec![index], vec![dto])),
        }
    }
    batches
        .into_iter()
        .map(|(_, indices, dtos)| (indices, dtos))
        .collect()
}

/// Validation message followed by the per-field messages
fn describe(err: &AppError) -> String {
    let fields = err
        .details()
        .and_then(|d| d.as_object().cloned())
        .map(|map| {
            map.iter()
                .flat_map(|(field, messages)| {
                    messages
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|m| m.as_str().map(|m| format!("{}: {}", field, m)))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if fields.is_empty() {
        err.to_string()
    } else {
        format!("{} ({})", err, fields.join("; "))
    }
}

/// Next state after `action`
pub fn reduce(state: &ReviewState, action: ReviewAction) -> ReviewState {
    let mut next = state.clone();

    match action {
        ReviewAction::SourceTextChanged(text) => {
            next.source_text = text;
        }
        ReviewAction::GenerationSucceeded(response) => {
            let start_accepted = state.config.proposals_start_accepted;
            next.proposals = response
                .flashcards_proposals
                .into_iter()
                .map(|p| ProposalState {
                    front: p.front,
                    back: p.back,
                    source: FlashcardSource::AiFull,
                    is_accepted: start_accepted,
                    is_edited: false,
                })
                .collect();
            next.generation_id = Some(response.generation_id);
            next.error = None;
            next.notice = Some(format!(
                "Generated {} flashcard proposals. Review them before saving.",
                response.generated_count
            ));
        }
        ReviewAction::GenerationFailed(message) => {
            next.error = Some(message);
            next.notice = None;
        }
        ReviewAction::Accept(index) => {
            let Some(proposal) = next.proposals.get_mut(index) else {
                return next;
            };
            proposal.is_accepted = true;
            clear_banners(&mut next);
        }
        ReviewAction::Edit { index, front, back } => {
            let Some(proposal) = next.proposals.get_mut(index) else {
                return next;
            };
            proposal.front = front;
            proposal.back = back;
            proposal.is_edited = true;
            proposal.is_accepted = true;
            clear_banners(&mut next);
        }
        ReviewAction::Reject(index) => {
            let Some(proposal) = next.proposals.get_mut(index) else {
                return next;
            };
            proposal.is_accepted = false;
            clear_banners(&mut next);
        }
        ReviewAction::SaveSucceeded { saved } => {
            next.proposals.clear();
            next.source_text.clear();
            next.generation_id = None;
            next.error = None;
            next.notice = Some(format!("Saved {} flashcards.", saved));
        }
        ReviewAction::SaveFailed(message) => {
            next.error = Some(message);
            next.notice = None;
        }
        ReviewAction::SavePartiallyFailed { saved, message } => {
            next.proposals = state
                .proposals
                .iter()
                .enumerate()
                .filter(|(index, _)| !saved.contains(index))
                .map(|(_, p)| p.clone())
                .collect();
            next.error = Some(message);
            next.notice = None;
        }
        ReviewAction::DismissError => next.error = None,
        ReviewAction::DismissNotice => next.notice = None,
    }

    next
}

fn clear_banners(state: &mut ReviewState) {
    state.error = None;
    state.notice = None;
}
