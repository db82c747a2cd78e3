//! Resolving an authenticated identity into an application user.
//!
//! The identity service only knows id, email, and signup metadata; role,
//! department, and workspace come from the profile row keyed by the identity
//! id. A verified identity with no profile row means signup was interrupted
//! before workspace setup ran; if the signup metadata names a workspace, the
//! setup is completed here exactly once, otherwise the identity is signed out.

use crate::backend::{AuthApi, AuthSession, TableApi};
use crate::error::{Error, Result};
use crate::rows::NewProfileRow;
use crate::types::{ADMIN_DEPARTMENT, AppUser, Role};
use tracing::{error, info, warn};

/// Resolve `session` into an [`AppUser`], running the one-shot setup recovery
/// when needed. Signs the identity out before returning an error.
pub async fn resolve_user(
    auth: &dyn AuthApi,
    tables: &dyn TableApi,
    session: &AuthSession,
) -> Result<AppUser> {
    if let Some(profile) = tables.fetch_profile(&session.user_id).await? {
        return Ok(profile.into_user());
    }

    if session.metadata.workspace_name.is_none() {
        warn!(user = %session.user_id, "identity has no profile and no setup metadata; signing out");
        auth.sign_out().await?;
        return Err(Error::ProfileNotFound(session.user_id.clone()));
    }

    info!(user = %session.user_id, "verified identity with missing profile; completing workspace setup");
    if let Err(err) = complete_setup(tables, session).await {
        error!(error = %err, "workspace setup completion failed; signing out");
        auth.sign_out().await?;
        return Err(Error::SetupFailed(err.to_string()));
    }

    match tables.fetch_profile(&session.user_id).await? {
        Some(profile) => Ok(profile.into_user()),
        None => {
            auth.sign_out().await?;
            Err(Error::SetupFailed(
                "profile still missing after setup".to_string(),
            ))
        }
    }
}

/// Create the workspace, its Administration department, and the Admin profile
/// described by the signup metadata.
async fn complete_setup(tables: &dyn TableApi, session: &AuthSession) -> Result<()> {
    let workspace_name = session
        .metadata
        .workspace_name
        .as_deref()
        .ok_or_else(|| Error::SetupFailed("signup metadata has no workspace name".to_string()))?;
    let full_name = session
        .metadata
        .full_name
        .clone()
        .unwrap_or_else(|| session.email.clone());

    let workspace = tables
        .insert_workspace(workspace_name, &session.user_id)
        .await?;
    let department = tables
        .insert_department(ADMIN_DEPARTMENT, &workspace.id)
        .await?;
    tables
        .insert_profile(NewProfileRow {
            id: session.user_id.clone(),
            email: session.email.clone(),
            full_name,
            role: Role::Admin,
            department_id: department.id,
            workspace_id: workspace.id,
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::SignupMetadata;

    #[tokio::test]
    async fn missing_profile_with_metadata_completes_setup() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .sign_up(
                "founder@example.com",
                "pw",
                SignupMetadata {
                    full_name: Some("Founder".into()),
                    workspace_name: Some("Acme".into()),
                },
            )
            .await
            .unwrap();
        let session = outcome.session.unwrap();

        let user = resolve_user(&backend, &backend, &session).await.unwrap();
        assert_eq!(user.name, "Founder");
        assert_eq!(user.role, Role::Admin);

        let departments = tables_departments(&backend, &user.workspace_id).await;
        assert_eq!(departments, vec![ADMIN_DEPARTMENT.to_string()]);

        let workspace = backend
            .fetch_workspace(&user.workspace_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workspace.name, "Acme");
        assert_eq!(workspace.owner_id, user.id);
    }

    #[tokio::test]
    async fn missing_profile_without_metadata_signs_out() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .sign_up("drifter@example.com", "pw", SignupMetadata::default())
            .await
            .unwrap();
        let session = outcome.session.unwrap();

        let err = resolve_user(&backend, &backend, &session)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProfileNotFound(_)));
        assert!(backend.session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn setup_runs_once_then_profile_resolves_directly() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .sign_up(
                "founder@example.com",
                "pw",
                SignupMetadata {
                    full_name: None,
                    workspace_name: Some("Acme".into()),
                },
            )
            .await
            .unwrap();
        let session = outcome.session.unwrap();

        let first = resolve_user(&backend, &backend, &session).await.unwrap();
        let second = resolve_user(&backend, &backend, &session).await.unwrap();
        assert_eq!(first.workspace_id, second.workspace_id);

        // Full name fell back to the email.
        assert_eq!(first.name, "founder@example.com");
    }

    async fn tables_departments(backend: &MemoryBackend, workspace_id: &str) -> Vec<String> {
        backend
            .fetch_departments(workspace_id)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }
}
