//! Subcommand handlers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use tagblock_config::TagblockConfig;
use tagblock_core::{ControllerSettings, LockController, Ports, TokenReader};
use tagblock_store::{DocumentStore, FileDocumentStore, ProfileError, ProfileStore};
use tagblock_types::{
    AppToken, CategoryToken, LockStatus, Profile, ProfileId, ProfileName, ProfilePatch,
};

use crate::console_reader::ConsoleReader;
use crate::shield::ShieldEnforcer;
use crate::{AddArgs, EditArgs, ProfileCommand};

/// How a command finished, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// Already reported on stderr.
    Failed,
    /// The change took effect but is not fully enforced or not saved.
    Degraded,
}

/// Everything a command may touch, opened from the resolved data directory.
pub struct Session {
    pub data_dir: PathBuf,
    pub profiles: Arc<ProfileStore>,
    storage: Arc<dyn DocumentStore>,
    shield: Arc<ShieldEnforcer>,
    settings: ControllerSettings,
}

impl Session {
    pub fn open(config: &TagblockConfig) -> Self {
        let data_dir = config.data_dir();
        tracing::debug!(data_dir = %data_dir.display(), "Opening session");
        let storage: Arc<dyn DocumentStore> = Arc::new(FileDocumentStore::new(&data_dir));
        let profiles = Arc::new(ProfileStore::open(storage.clone()));
        Self {
            shield: Arc::new(ShieldEnforcer::new(&data_dir)),
            data_dir,
            profiles,
            storage,
            settings: ControllerSettings {
                scan_timeout: config.scan_timeout(),
            },
        }
    }

    pub fn controller(&self, reader: Arc<dyn TokenReader>) -> LockController {
        let ports = Ports {
            reader,
            enforcer: self.shield.clone(),
        };
        LockController::open(
            ports,
            self.profiles.clone(),
            self.storage.clone(),
            self.settings,
        )
    }

    /// Controller for commands that never scan.
    fn passive_controller(&self) -> LockController {
        let (_, idle) = tokio::sync::mpsc::channel(1);
        self.controller(Arc::new(ConsoleReader::new(idle)))
    }
}

pub fn status(session: &Session) -> Exit {
    let controller = session.passive_controller();
    let current = session.profiles.current();

    println!("Status:  {}", controller.status());
    if let Some(hint) = controller.armed_token_hint() {
        println!("Tag:     {hint}");
    }
    println!("Profile: {} ({})", current.name, current.id());
    if let Some(shield) = session.shield.current()
        && shield.active
    {
        println!(
            "Shield:  {} apps, {} categories",
            shield.apps.len(),
            shield.categories.len()
        );
    }
    println!("Data:    {}", session.data_dir.display());
    Exit::Success
}

pub async fn authorize(session: &Session) -> Exit {
    let controller = session.passive_controller();
    match controller.authorize().await {
        Ok(()) => {
            println!("Restrictions authorized.");
            Exit::Success
        }
        Err(e) => {
            eprintln!("{e}");
            Exit::Failed
        }
    }
}

pub async fn toggle(session: &Session) -> Exit {
    let controller = session.controller(Arc::new(ConsoleReader::stdin()));
    let toggle = controller.request_toggle();
    tokio::pin!(toggle);

    let result = loop {
        tokio::select! {
            result = &mut toggle => break result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {e}");
                    break (&mut toggle).await;
                }
                if !controller.cancel_scan() {
                    eprintln!("Finishing the current toggle...");
                }
            }
        }
    };

    match result {
        Ok(outcome) => {
            match (outcome.status, &outcome.profile_id) {
                (LockStatus::Locked, Some(id)) => {
                    let name = session
                        .profiles
                        .get(id)
                        .map_or_else(|| id.to_string(), |p| p.name.to_string());
                    println!("Locked with profile {name}.");
                }
                (LockStatus::Locked, None) => println!("Locked."),
                (LockStatus::Unlocked, _) => println!("Unlocked."),
            }
            for degradation in &outcome.degradations {
                eprintln!("{}", degradation.user_message());
            }
            if outcome.is_degraded() {
                Exit::Degraded
            } else {
                Exit::Success
            }
        }
        Err(err) => {
            eprintln!("{}", err.user_message());
            Exit::Failed
        }
    }
}

pub fn profile(session: &Session, command: ProfileCommand) -> Result<Exit> {
    let store = &session.profiles;
    match command {
        ProfileCommand::List => {
            let current = store.current_id();
            for profile in store.list() {
                let marker = if *profile.id() == current { '*' } else { ' ' };
                println!("{marker} {}  {}  [{}]", profile.id(), profile.name, profile.icon);
            }
            Ok(Exit::Success)
        }
        ProfileCommand::Show { id } => {
            let profile = match id {
                Some(id) => {
                    let id = ProfileId::new(id);
                    store
                        .get(&id)
                        .with_context(|| format!("no profile with id {id}"))?
                }
                None => store.current(),
            };
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(Exit::Success)
        }
        ProfileCommand::Add(args) => {
            let profile = args.into_profile()?;
            let id = profile.id().clone();
            match store.add(profile) {
                Ok(()) => {
                    println!("Added profile {id}");
                    Ok(Exit::Success)
                }
                Err(err) => report_unsaved(err, "Added profile", &id),
            }
        }
        ProfileCommand::Edit(args) => {
            let id = ProfileId::new(args.id.clone());
            let patch = args.into_patch()?;
            if patch.is_empty() {
                bail!("nothing to change; pass --name, --icon, --app or --category");
            }
            report_change(store.update(&id, patch), "Updated profile", &id)
        }
        ProfileCommand::Select { id } => {
            let id = ProfileId::new(id);
            report_change(store.set_current(&id), "Selected profile", &id)
        }
        ProfileCommand::Delete { id } => {
            let id = ProfileId::new(id);
            report_change(store.delete(&id), "Deleted profile", &id)
        }
    }
}

fn report_change(result: Result<bool, ProfileError>, done: &str, id: &ProfileId) -> Result<Exit> {
    match result {
        Ok(true) => {
            println!("{done} {id}");
            Ok(Exit::Success)
        }
        Ok(false) => bail!("no profile with id {id}"),
        Err(err) => report_unsaved(err, done, id),
    }
}

fn report_unsaved(err: ProfileError, done: &str, id: &ProfileId) -> Result<Exit> {
    match err {
        ProfileError::Persistence(e) => {
            eprintln!("{done} {id}, but the change was not saved: {e}");
            Ok(Exit::Degraded)
        }
        ProfileError::Validation(e) => Err(e.into()),
    }
}

impl AddArgs {
    fn into_profile(self) -> Result<Profile> {
        let name = ProfileName::new(self.name)?;
        let mut profile = Profile::new(name)
            .with_apps(self.apps.into_iter().map(AppToken::new))
            .with_categories(self.categories.into_iter().map(CategoryToken::new));
        if let Some(icon) = self.icon {
            profile = profile.with_icon(icon);
        }
        Ok(profile)
    }
}

impl EditArgs {
    fn into_patch(self) -> Result<ProfilePatch> {
        let name = self.name.map(ProfileName::new).transpose()?;
        let blocked_apps = (self.clear_apps || !self.apps.is_empty())
            .then(|| self.apps.into_iter().map(AppToken::new).collect::<BTreeSet<_>>());
        let blocked_categories = (self.clear_categories || !self.categories.is_empty()).then(|| {
            self.categories
                .into_iter()
                .map(CategoryToken::new)
                .collect::<BTreeSet<_>>()
        });
        Ok(ProfilePatch {
            name,
            icon: self.icon,
            blocked_apps,
            blocked_categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(args: &[&str]) -> EditArgs {
        EditArgs {
            id: "A".to_owned(),
            name: None,
            icon: None,
            apps: args.iter().map(|s| (*s).to_owned()).collect(),
            clear_apps: false,
            categories: Vec::new(),
            clear_categories: false,
        }
    }

    #[test]
    fn edit_without_flags_is_an_empty_patch() {
        assert!(edit(&[]).into_patch().unwrap().is_empty());
    }

    #[test]
    fn edit_apps_replaces_the_whole_set() {
        let patch = edit(&["com.example.chat", "com.example.mail"])
            .into_patch()
            .unwrap();
        assert_eq!(patch.blocked_apps.map(|apps| apps.len()), Some(2));
        assert_eq!(patch.blocked_categories, None);
    }

    #[test]
    fn clear_flag_yields_an_empty_set() {
        let mut args = edit(&[]);
        args.clear_categories = true;
        let patch = args.into_patch().unwrap();
        assert_eq!(patch.blocked_categories, Some(BTreeSet::new()));
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut args = edit(&[]);
        args.name = Some("   ".to_owned());
        assert!(args.into_patch().is_err());

        let add = AddArgs {
            name: " ".to_owned(),
            icon: None,
            apps: Vec::new(),
            categories: Vec::new(),
        };
        assert!(add.into_profile().is_err());
    }

    #[test]
    fn add_uses_default_icon_unless_given() {
        let add = AddArgs {
            name: "Work".to_owned(),
            icon: None,
            apps: vec!["com.example.chat".to_owned()],
            categories: Vec::new(),
        };
        let profile = add.into_profile().unwrap();
        assert_eq!(profile.icon, tagblock_types::DEFAULT_PROFILE_ICON);
        assert_eq!(profile.blocked_apps.len(), 1);
    }
}
