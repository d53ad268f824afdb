//! Refetch-on-mutation orchestration for dependent read-models.
//!
//! Every mutation goes through [`QueryCoordinator::execute`], which looks up
//! the mutation's [`InvalidationManifest`] and marks each named read-model
//! stale once the server confirms the change. Reads never wait for
//! mutations; a read racing a mutation may return the earlier value and the
//! next read after completion refetches.

mod manifest;

pub use manifest::InvalidationManifest;

use deskline_core::Credential;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::ClientError;
use crate::session::Session;
use crate::transport::{Mutation, MutationResponse, ReadModel, Transport, TransportError};

/// Runs mutations and reads against the API on behalf of a session.
pub struct QueryCoordinator<T> {
    session: Session<T>,
}

impl<T> Clone for QueryCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<T: Transport> QueryCoordinator<T> {
    #[must_use]
    pub const fn new(session: Session<T>) -> Self {
        Self { session }
    }

    #[must_use]
    pub const fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Run `mutation` and invalidate its manifest if it succeeded.
    ///
    /// A response carrying application errors is returned as-is and
    /// invalidates nothing.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotAuthenticated` if the mutation needs a credential
    ///   and none is stored
    /// - `ClientError::Authentication` if the API rejected the credential; the
    ///   session has already been cleared
    /// - `ClientError::TransientNetwork` or `ClientError::Validation` for other
    ///   transport failures
    #[instrument(skip(self, mutation), fields(kind = %mutation.kind()))]
    pub async fn execute(&self, mutation: &Mutation) -> Result<MutationResponse, ClientError> {
        let response = self.run(mutation).await?;

        if response.has_errors() {
            debug!(errors = ?response.errors, "Mutation reported errors, skipping invalidation");
        } else {
            self.invalidate(InvalidationManifest::for_mutation(mutation))
                .await;
        }

        Ok(response)
    }

    /// Run `mutations` in order, then invalidate the union of the manifests
    /// of those that succeeded.
    ///
    /// A failed mutation does not stop the batch.
    pub async fn execute_batch(
        &self,
        mutations: &[Mutation],
    ) -> Vec<Result<MutationResponse, ClientError>> {
        let mut stale = InvalidationManifest::default();
        let mut results = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            let result = self.run(mutation).await;
            if let Ok(response) = &result
                && !response.has_errors()
            {
                stale.merge(InvalidationManifest::for_mutation(mutation));
            }
            results.push(result);
        }

        self.invalidate(stale).await;
        results
    }

    /// Read `model` for the signed-in user.
    ///
    /// Returns `None` without touching the network unless the session is
    /// authenticated.
    ///
    /// # Errors
    ///
    /// Returns the classified transport error. Authentication errors clear
    /// the session first.
    #[instrument(skip(self), fields(model = %model))]
    pub async fn read(&self, model: &ReadModel) -> Result<Option<Value>, ClientError> {
        if !self.session.auth_state().is_authenticated() {
            debug!("Not authenticated, skipping read");
            return Ok(None);
        }
        let Some(credential) = self.session.credential()? else {
            return Ok(None);
        };

        match self
            .session
            .transport()
            .query(Some(&credential), model)
            .await
        {
            Ok(value) => Ok(Some(value)),
            Err(error) => Err(self.escalate(&credential, error)),
        }
    }

    /// Read `model` and decode it.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read), plus `ClientError::TransientNetwork` when the
    /// payload does not decode.
    pub async fn read_as<D: DeserializeOwned>(
        &self,
        model: &ReadModel,
    ) -> Result<Option<D>, ClientError> {
        match self.read(model).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ClientError::from(TransportError::Parse(e))),
        }
    }

    /// Mark every read-model stale.
    pub async fn invalidate_all(&self) {
        self.session.transport().invalidate_all().await;
    }

    async fn run(&self, mutation: &Mutation) -> Result<MutationResponse, ClientError> {
        let kind = mutation.kind();
        if kind.is_authentication() {
            // A rejected password is not a rejected session
            return self
                .session
                .transport()
                .mutate(None, mutation)
                .await
                .map_err(ClientError::from);
        }

        let credential = self
            .session
            .credential()?
            .ok_or(ClientError::NotAuthenticated)?;

        self.session
            .transport()
            .mutate(Some(&credential), mutation)
            .await
            .map_err(|error| self.escalate(&credential, error))
    }

    /// Route authentication errors to the session before returning them.
    ///
    /// `credential` is the one the failed request carried, so a late
    /// rejection cannot clear a session that has since moved on.
    fn escalate(&self, credential: &Credential, error: TransportError) -> ClientError {
        if error.is_authentication() {
            warn!(error = %error, "API rejected credential");
            self.session
                .handle_authentication_failure(credential, &error.to_string());
        }
        error.into()
    }

    async fn invalidate(&self, manifest: InvalidationManifest) {
        for model in manifest {
            self.session.transport().invalidate(&model).await;
        }
    }
}

impl<T> std::fmt::Debug for QueryCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCoordinator")
            .field("session", &self.session)
            .finish()
    }
}
