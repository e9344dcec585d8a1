use handreceipt_core::config::normalize_api_base_url;
use handreceipt_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::config_profiles::{parse_holder_key, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_url,
            auth_url,
            auth_api_key,
            holder_keys,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileUpdate {
                api_url,
                auth_url,
                auth_api_key,
                holder_keys,
            },
            no_activate,
        ),
        ConfigCommands::Show { profile } => run_config_show(profile.as_deref().or(global_profile)),
    }
}

/// Values given on the command line; `None` keeps what the profile has.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub auth_api_key: Option<String>,
    pub holder_keys: Vec<String>,
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = apply_profile_update(&mut config, profile_name, update, no_activate)?;
    let path = config.save().map_err(CliError::Config)?;
    println!("Saved profile '{profile_name}' to {}", path.display());
    Ok(())
}

/// Merge `update` into `config` and return the profile name it landed in.
pub fn apply_profile_update(
    config: &mut CliProfilesConfig,
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<String, CliError> {
    let profile_name = config.resolve_profile_name(profile_name);

    let api_url = normalize_text_option(update.api_url)
        .map(|url| normalize_api_base_url(&url))
        .transpose()?;
    let holder_keys = update
        .holder_keys
        .iter()
        .map(|raw| parse_holder_key(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(CliError::Config)?;

    let profile = config.profile_mut_or_default(&profile_name);
    if let Some(api_url) = api_url {
        profile.engine.api_base_url = Some(api_url);
    }
    if let Some(auth_url) = normalize_text_option(update.auth_url) {
        profile.auth_url = Some(auth_url);
    }
    if let Some(api_key) = normalize_text_option(update.auth_api_key) {
        profile.auth_api_key = Some(api_key);
    }
    profile.holder_keys.extend(holder_keys);

    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.clone());
    }
    Ok(profile_name)
}

fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };
    println!("Profile '{profile_name}':");
    println!("{}", serde_json::to_string_pretty(profile)?);
    Ok(())
}
