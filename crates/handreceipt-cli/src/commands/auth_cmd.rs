use chrono::Utc;

use crate::auth::{clear_stored_session, load_stored_session, save_stored_session};
use crate::auth::{AuthSession, AuthUser};
use crate::cli::AuthCommands;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    match command {
        AuthCommands::Login {
            profile,
            access_token,
            refresh_token,
            expires_in,
            user_id,
            email,
        } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            if config
                .profile(&profile_name)
                .and_then(|profile| profile.auth_url())
                .is_none()
            {
                tracing::warn!(
                    "Profile '{profile_name}' has no auth_url; the session cannot be refreshed"
                );
            }
            let session = AuthSession {
                access_token: access_token.trim().to_string(),
                refresh_token: refresh_token.trim().to_string(),
                expires_at: Utc::now().timestamp().saturating_add(expires_in),
                user: AuthUser {
                    id: user_id.trim().to_string(),
                    email,
                },
            };
            if session.access_token.is_empty() || session.user.id.is_empty() {
                return Err(CliError::Config(
                    "access token and user id are required".to_string(),
                ));
            }
            save_stored_session(&profile_name, &session)?;
            println!("Signed in profile '{profile_name}' as {}", session.user.id);
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            match load_stored_session(&profile_name)? {
                Some(session) => {
                    let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                    let state = if session.is_expired() { "expired" } else { "valid" };
                    println!(
                        "Profile '{}' is signed in as {} {} (token {}, expires_at={})",
                        profile_name, session.user.id, email_label, state, session.expires_at
                    );
                }
                None => println!("Profile '{profile_name}' is not signed in."),
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            clear_stored_session(&profile_name)?;
            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}
