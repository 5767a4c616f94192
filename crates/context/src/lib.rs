//! Shared communication substrate for a workflow/tag pair: append-only
//! channel with inbox semantics, team documents, opaque resources, and
//! local proposal voting.

pub mod channel;
pub mod documents;
pub mod inbox;
pub mod proposals;
pub mod provider;
pub mod resources;

pub use channel::{extract_mentions, AppendOptions, ChannelEntry, ChannelKind, ReadFilter};
pub use proposals::{
    CreateProposal, Proposal, ProposalManager, ProposalOption, ProposalStatus, ProposalType,
    Resolution, ResolutionType, TieBreaker,
};
pub use provider::ContextProvider;
pub use resources::{Resource, ResourceRef, ResourceType};
