//! Local proposal/voting manager.
//!
//! Proposals live in memory, scoped to one context. Votes are idempotent
//! per `(proposal, voter)` — a second vote replaces the first. Resolution
//! is evaluated after every vote: with quorum unmet the proposal stays
//! active; otherwise votes are tallied, the resolution type applied, ties
//! broken, and the proposal marked resolved with a winner or `none`.
//! Expiration is lazy: any access past `expires_at` expires an active
//! proposal.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use aw_domain::error::{Error, Result};

/// Default lifetime of a proposal without an explicit expiry.
const DEFAULT_TTL_HOURS: i64 = 24;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalType {
    Election,
    Decision,
    Approval,
    Assignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionType {
    #[default]
    Plurality,
    Majority,
    Unanimous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    /// The tied option whose earliest vote arrived first wins.
    #[default]
    FirstVote,
    /// Ties resolve to no winner.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Resolution {
    #[serde(default, rename = "type")]
    pub resolution_type: ResolutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quorum: Option<u32>,
    #[serde(default)]
    pub tie_breaker: TieBreaker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub choice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Global cast order, used by the first-vote tie-breaker. Re-voting
    /// moves the voter to the back of the order.
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Active,
    Resolved,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalResult {
    /// `None` when the resolution produced no winner.
    pub winner: Option<String>,
    pub counts: HashMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub options: Vec<ProposalOption>,
    pub resolution: Resolution,
    pub binding: bool,
    pub expires_at: DateTime<Utc>,
    pub created_by: String,
    pub votes: HashMap<String, Vote>,
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProposalResult>,
}

/// Parameters for creating a proposal.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProposal {
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<ProposalOption>,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub binding: bool,
    /// Lifetime in milliseconds; defaults to 24 hours.
    #[serde(default)]
    pub expires_in_ms: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    seq: u64,
    vote_seq: u64,
    proposals: HashMap<String, Proposal>,
}

/// In-memory proposal manager for one context.
pub struct ProposalManager {
    inner: Mutex<Inner>,
}

impl Default for ProposalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProposalManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                seq: 0,
                vote_seq: 0,
                proposals: HashMap::new(),
            }),
        }
    }

    pub fn create(&self, created_by: &str, params: CreateProposal) -> Result<Proposal> {
        let mut options = params.options;
        if options.is_empty() {
            if params.proposal_type == ProposalType::Approval {
                options = vec![
                    ProposalOption { id: "approve".into(), label: "Approve".into() },
                    ProposalOption { id: "reject".into(), label: "Reject".into() },
                ];
            } else {
                return Err(Error::Other("proposal requires at least one option".into()));
            }
        }

        let ttl = params
            .expires_in_ms
            .map(|ms| Duration::milliseconds(ms as i64))
            .unwrap_or_else(|| Duration::hours(DEFAULT_TTL_HOURS));

        let mut inner = self.inner.lock();
        inner.seq += 1;
        let proposal = Proposal {
            id: format!("prop-{}", inner.seq),
            proposal_type: params.proposal_type,
            title: params.title,
            description: params.description,
            options,
            resolution: params.resolution,
            binding: params.binding,
            expires_at: Utc::now() + ttl,
            created_by: created_by.to_owned(),
            votes: HashMap::new(),
            status: ProposalStatus::Active,
            result: None,
        };
        inner.proposals.insert(proposal.id.clone(), proposal.clone());
        tracing::info!(id = %proposal.id, by = created_by, "proposal created");
        Ok(proposal)
    }

    /// Record (or replace) a vote, then evaluate resolution.
    pub fn vote(
        &self,
        id: &str,
        voter: &str,
        choice: &str,
        reason: Option<String>,
    ) -> Result<Proposal> {
        let mut inner = self.inner.lock();
        inner.vote_seq += 1;
        let seq = inner.vote_seq;

        let proposal = inner
            .proposals
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("proposal '{id}' not found")))?;
        expire_if_due(proposal);

        if proposal.status != ProposalStatus::Active {
            return Err(Error::Conflict(format!(
                "proposal '{id}' is {:?} and no longer accepts votes",
                proposal.status
            )));
        }
        if !proposal.options.iter().any(|o| o.id == choice) {
            return Err(Error::NotFound(format!(
                "option '{choice}' does not exist on proposal '{id}'"
            )));
        }

        proposal.votes.insert(
            voter.to_owned(),
            Vote { choice: choice.to_owned(), reason, seq },
        );
        evaluate(proposal);
        Ok(proposal.clone())
    }

    pub fn get(&self, id: &str) -> Result<Proposal> {
        let mut inner = self.inner.lock();
        let proposal = inner
            .proposals
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("proposal '{id}' not found")))?;
        expire_if_due(proposal);
        Ok(proposal.clone())
    }

    pub fn list(&self) -> Vec<Proposal> {
        let mut inner = self.inner.lock();
        let mut all: Vec<Proposal> = inner
            .proposals
            .values_mut()
            .map(|p| {
                expire_if_due(p);
                p.clone()
            })
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Cancel an active proposal; only the creator may.
    pub fn cancel(&self, id: &str, caller: &str) -> Result<Proposal> {
        let mut inner = self.inner.lock();
        let proposal = inner
            .proposals
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("proposal '{id}' not found")))?;
        expire_if_due(proposal);

        if proposal.created_by != caller {
            return Err(Error::Auth(format!(
                "only '{}' may cancel proposal '{id}'",
                proposal.created_by
            )));
        }
        if proposal.status != ProposalStatus::Active {
            return Err(Error::Conflict(format!(
                "proposal '{id}' is {:?}",
                proposal.status
            )));
        }
        proposal.status = ProposalStatus::Cancelled;
        Ok(proposal.clone())
    }
}

fn expire_if_due(proposal: &mut Proposal) {
    if proposal.status == ProposalStatus::Active && Utc::now() > proposal.expires_at {
        proposal.status = ProposalStatus::Expired;
        tracing::info!(id = %proposal.id, "proposal expired");
    }
}

/// Tally and resolve. With quorum unmet the proposal stays active; once
/// met it resolves with a winner or `none`.
fn evaluate(proposal: &mut Proposal) {
    if let Some(quorum) = proposal.resolution.quorum {
        if (proposal.votes.len() as u32) < quorum {
            return;
        }
    }

    let mut counts: HashMap<String, u32> = HashMap::new();
    // Earliest vote seq per option, for the first-vote tie-breaker.
    let mut earliest: HashMap<String, u64> = HashMap::new();
    for vote in proposal.votes.values() {
        *counts.entry(vote.choice.clone()).or_insert(0) += 1;
        earliest
            .entry(vote.choice.clone())
            .and_modify(|s| *s = (*s).min(vote.seq))
            .or_insert(vote.seq);
    }

    let total: u32 = counts.values().sum();
    let top = counts.values().max().copied().unwrap_or(0);
    let leaders: Vec<&String> = counts
        .iter()
        .filter(|(_, c)| **c == top)
        .map(|(opt, _)| opt)
        .collect();

    let winner: Option<String> = match proposal.resolution.resolution_type {
        ResolutionType::Plurality => pick_leader(&leaders, &earliest, proposal.resolution.tie_breaker),
        ResolutionType::Majority => {
            if top * 2 > total {
                leaders.first().map(|s| (*s).clone())
            } else {
                None
            }
        }
        ResolutionType::Unanimous => {
            if counts.len() == 1 {
                leaders.first().map(|s| (*s).clone())
            } else {
                None
            }
        }
    };

    proposal.status = ProposalStatus::Resolved;
    proposal.result = Some(ProposalResult { winner, counts });
    tracing::info!(
        id = %proposal.id,
        winner = ?proposal.result.as_ref().and_then(|r| r.winner.as_deref()),
        "proposal resolved"
    );
}

fn pick_leader(
    leaders: &[&String],
    earliest: &HashMap<String, u64>,
    tie_breaker: TieBreaker,
) -> Option<String> {
    match leaders.len() {
        0 => None,
        1 => Some(leaders[0].clone()),
        _ => match tie_breaker {
            TieBreaker::FirstVote => leaders
                .iter()
                .min_by_key(|opt| earliest.get(**opt).copied().unwrap_or(u64::MAX))
                .map(|s| (*s).clone()),
            TieBreaker::None => None,
        },
    }
}
