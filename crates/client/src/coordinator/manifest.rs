//! Read-models each mutation makes stale.

use std::collections::BTreeSet;

use crate::transport::{Mutation, ReadModel};

/// Set of read-models to refresh after a mutation succeeds.
///
/// Ordered, so invalidation runs in a stable order and a model named by
/// several mutations of a batch is still refreshed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationManifest {
    models: BTreeSet<ReadModel>,
}

impl InvalidationManifest {
    /// Manifest for `mutation`.
    ///
    /// Ticket-level mutations refresh both the ticket detail and the aggregate
    /// counts. Exporting closed tickets changes nothing.
    #[must_use]
    pub fn for_mutation(mutation: &Mutation) -> Self {
        let models = match mutation {
            Mutation::CreateTicket(_) => vec![ReadModel::TicketList],
            Mutation::AssignTicket { ticket_id }
            | Mutation::AddComment { ticket_id, .. }
            | Mutation::ResolveTicket { ticket_id }
            | Mutation::CloseTicket { ticket_id } => vec![
                ReadModel::TicketDetail(ticket_id.clone()),
                ReadModel::TicketStatCount,
            ],
            Mutation::ExportClosedTickets { .. } => Vec::new(),
            Mutation::Login { .. } | Mutation::Signup(_) => vec![
                ReadModel::CurrentUser,
                ReadModel::TicketList,
                ReadModel::TicketStatCount,
            ],
        };

        Self {
            models: models.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn contains(&self, model: &ReadModel) -> bool {
        self.models.contains(model)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadModel> {
        self.models.iter()
    }

    /// Add every model of `other`.
    pub fn merge(&mut self, other: Self) {
        self.models.extend(other.models);
    }
}

impl IntoIterator for InvalidationManifest {
    type Item = ReadModel;
    type IntoIter = std::collections::btree_set::IntoIter<ReadModel>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}
