// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Registry of installed applications.
//!
//! Dip keeps every installed application in one settings file called the
//! __registry__. Each entry is stored as plain data, and only turned into a
//! [`Dip`] when it is looked up. Writing an application back flattens it
//! into plain data again.
//!
//! The registry file is never locked. Two dip processes mutating it at the
//! same time will race, and the last writer wins.

use crate::{
    app::{AppError, Dip},
    config::{AppDefinition, ConfigError, GitSettings, SettingsDocument},
    path::{default_exe_dir, default_settings_file, PathError},
};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Registry of installed applications backed by a settings file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    file: PathBuf,
    apps: BTreeMap<String, AppDefinition>,
}

impl Settings {
    /// Construct empty registry for target settings file.
    ///
    /// Nothing is read or written.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            apps: BTreeMap::new(),
        }
    }

    /// Load registry from target settings file.
    ///
    /// A missing settings file is created empty.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Read`] if file exists but cannot be read.
    /// - Return [`SettingsError::Malformed`] if file content is not a valid
    ///   settings document.
    /// - Return [`SettingsError::Write`] if missing file cannot be created.
    #[instrument(skip(file), level = "debug")]
    pub fn load(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        debug!("load settings from {:?}", file.display());

        let content = match read_to_string(&file) {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                let settings = Self::new(file);
                settings.save()?;
                return Ok(settings);
            }
            Err(source) => return Err(SettingsError::Read { source, path: file }),
        };

        let document: SettingsDocument = content
            .parse()
            .map_err(|source| SettingsError::Malformed {
                source,
                path: file.clone(),
            })?;

        Ok(Self {
            file,
            apps: document.0,
        })
    }

    /// Load registry from default settings file.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Path`] if default location cannot be
    ///   resolved.
    /// - Return any error of [`Settings::load`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_settings_file()?)
    }

    /// Load registry, run operation on it, and save it if the operation
    /// succeeds.
    ///
    /// Nothing is written when the operation fails.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Settings::load`], [`Settings::save`], or the
    ///   operation itself.
    pub fn save_on_exit<T, E>(
        file: impl Into<PathBuf>,
        operation: impl FnOnce(&mut Settings) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<SettingsError>,
    {
        let mut settings = Self::load(file)?;
        let value = operation(&mut settings)?;
        settings.save()?;
        Ok(value)
    }

    /// Write registry to its settings file.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Write`] if file or its parent directory
    ///   cannot be written.
    /// - Return [`SettingsError::Serialize`] if registry cannot be
    ///   serialized.
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.file)
    }

    /// Write registry to another settings file.
    ///
    /// # Errors
    ///
    /// - Return any error of [`Settings::save`].
    #[instrument(skip(self, file), level = "debug")]
    pub fn save_as(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        debug!("save settings to {:?}", file.display());

        if let Some(parent) = file.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|source| SettingsError::Write {
                source,
                path: parent.to_path_buf(),
            })?;
        }

        write(file, self.render()?).map_err(|source| SettingsError::Write {
            source,
            path: file.to_path_buf(),
        })
    }

    /// Path of settings file backing registry.
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Registry as serializable document.
    pub fn document(&self) -> SettingsDocument {
        SettingsDocument(self.apps.clone())
    }

    /// Look up installed application.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NotInstalled`] if no such application.
    /// - Return [`SettingsError::App`] if stored entry is not a valid
    ///   application.
    pub fn get(&self, name: &str) -> Result<Dip> {
        let definition = self
            .apps
            .get(name)
            .ok_or_else(|| SettingsError::NotInstalled { name: name.into() })?;

        Ok(Dip::from_definition(definition.clone())?)
    }

    /// Store application, replacing any entry of the same name.
    pub fn set(&mut self, app: &Dip) {
        self.apps.insert(app.name.clone(), app.to_definition());
    }

    /// Remove application entry without touching its launcher.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NotInstalled`] if no such application.
    pub fn remove(&mut self, name: &str) -> Result<AppDefinition> {
        self.apps
            .remove(name)
            .ok_or_else(|| SettingsError::NotInstalled { name: name.into() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// Iterate through all entries, materializing each into an application.
    pub fn iter(&self) -> impl Iterator<Item = Result<Dip>> + '_ {
        self.apps
            .values()
            .map(|definition| Dip::from_definition(definition.clone()).map_err(SettingsError::from))
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Install new application.
    ///
    /// Writes launcher into `path`, or the default executable directory if
    /// not given. The entry is only recorded once its launcher exists, so a
    /// failed install leaves the registry untouched.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::App`] if application is invalid or its
    ///   launcher cannot be written.
    /// - Return [`SettingsError::Path`] if default executable directory
    ///   cannot be resolved.
    #[instrument(skip(self, home, path, env, git), level = "debug")]
    pub fn install(
        &mut self,
        name: &str,
        home: impl Into<PathBuf>,
        path: Option<PathBuf>,
        env: BTreeMap<String, String>,
        git: Option<GitSettings>,
    ) -> Result<Dip> {
        let path = match path {
            Some(path) => path,
            None => default_exe_dir()?,
        };

        let app = Dip::new(name, home, path, env, git)?;
        app.install()?;
        self.set(&app);
        info!("installed {:?} to {:?}", app.name, app.executable().display());

        Ok(app)
    }

    /// Uninstall application.
    ///
    /// Launcher removal and network teardown are best-effort. The entry is
    /// removed last, so it survives if the stored application is invalid.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NotInstalled`] if no such application.
    /// - Return [`SettingsError::App`] if stored entry is not a valid
    ///   application.
    #[instrument(skip(self), level = "debug")]
    pub fn uninstall(&mut self, name: &str) -> Result<Dip> {
        let app = self.get(name)?;
        app.uninstall();
        self.apps.remove(name);
        info!("uninstalled {:?} from {:?}", app.name, app.executable().display());

        Ok(app)
    }

    /// Uninstall several applications at once.
    ///
    /// Every name is looked up before anything is touched, so one bad name
    /// leaves all launchers and entries in place.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::NotInstalled`] if any name is not installed.
    /// - Return [`SettingsError::App`] if any stored entry is not a valid
    ///   application.
    pub fn uninstall_many<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Dip>> {
        let names = names.into_iter().collect::<Vec<_>>();
        for name in &names {
            self.get(name)?;
        }

        names.into_iter().map(|name| self.uninstall(name)).collect()
    }

    /// Delete settings file.
    ///
    /// A settings file that does not exist counts as deleted.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::Reset`] if file cannot be deleted.
    pub fn reset(file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        match remove_file(file) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SettingsError::Reset {
                source,
                path: file.to_path_buf(),
            }),
        }
    }

    fn render(&self) -> Result<String> {
        crate::config::to_json_pretty(&self.apps).map_err(SettingsError::Serialize)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.render()?.as_str())
    }
}

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Application is not in registry.
    #[error("{name:?} command is not installed")]
    NotInstalled { name: String },

    /// Settings file cannot be read.
    #[error("unable to access dip settings at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file cannot be written.
    #[error("unable to write dip settings at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file is not a valid settings document.
    #[error("malformed dip settings at {:?}", path.display())]
    Malformed {
        #[source]
        source: ConfigError,
        path: PathBuf,
    },

    /// Registry cannot be serialized.
    #[error(transparent)]
    Serialize(ConfigError),

    /// Settings file cannot be deleted.
    #[error("unable to reset dip settings at {:?}", path.display())]
    Reset {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Default location cannot be resolved.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Application is invalid.
    #[error(transparent)]
    App(#[from] AppError),
}

impl From<SettingsError> for std::fmt::Error {
    fn from(_: SettingsError) -> Self {
        std::fmt::Error
    }
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exe::ExeError;
    use indoc::{formatdoc, indoc};
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        env::current_dir,
        fs::{create_dir_all, read_to_string, write},
    };

    #[sealed_test]
    fn load_missing_file_creates_it() -> anyhow::Result<()> {
        let file = current_dir()?.join("nested/dip/settings.json");
        let settings = Settings::load(&file)?;

        assert!(settings.is_empty());
        assert_eq!(read_to_string(&file)?, "{}");

        Ok(())
    }

    #[sealed_test]
    fn load_malformed_file() -> anyhow::Result<()> {
        let file = current_dir()?.join("settings.json");
        write(&file, "{\"fizz\": ")?;
        assert!(matches!(
            Settings::load(&file),
            Err(SettingsError::Malformed { .. })
        ));
        Ok(())
    }

    #[sealed_test(env = [("DIP_PATH", "bin")])]
    fn install_fizz() -> anyhow::Result<()> {
        let root = current_dir()?;
        create_dir_all(root.join("bin"))?;
        let file = root.join("settings.json");

        let mut settings = Settings::load(&file)?;
        settings.install("fizz", "/tmp/fizz", None, BTreeMap::new(), None)?;
        settings.save()?;

        let expect = formatdoc! {r#"
            {{
                "fizz": {{
                    "home": "/tmp/fizz",
                    "name": "fizz",
                    "path": "{}"
                }}
            }}"#,
            root.join("bin").display()
        };
        assert_eq!(read_to_string(&file)?, expect);
        assert_eq!(
            read_to_string(root.join("bin/fizz"))?,
            "#!/bin/bash\ndip run fizz -- $@\n"
        );

        Ok(())
    }

    #[sealed_test]
    fn install_then_get_has_absolute_home() -> anyhow::Result<()> {
        let root = current_dir()?;
        let mut settings = Settings::new(root.join("settings.json"));
        settings.install("fizz", "fizz/home", Some(root.clone()), BTreeMap::new(), None)?;

        let app = settings.get("fizz")?;
        assert_eq!(app.home, root.join("fizz/home"));
        assert_eq!(app.path, root);

        Ok(())
    }

    #[sealed_test]
    fn install_with_unwritable_path_is_not_recorded() -> anyhow::Result<()> {
        let root = current_dir()?;
        let mut settings = Settings::new(root.join("settings.json"));
        let result = settings.install(
            "fizz",
            "/tmp/fizz",
            Some(root.join("missing")),
            BTreeMap::new(),
            None,
        );

        assert!(matches!(
            result,
            Err(SettingsError::App(AppError::Exe(ExeError::Write { .. })))
        ));
        assert!(!settings.contains("fizz"));

        Ok(())
    }

    #[sealed_test]
    fn uninstall_removes_entry() -> anyhow::Result<()> {
        let root = current_dir()?;
        let mut settings = Settings::new(root.join("settings.json"));
        settings.install("fizz", root.join("gone"), Some(root.clone()), BTreeMap::new(), None)?;
        settings.install("buzz", root.join("gone"), Some(root.clone()), BTreeMap::new(), None)?;

        settings.uninstall("fizz")?;
        assert!(!root.join("fizz").exists());
        assert_eq!(settings.names().collect::<Vec<_>>(), vec!["buzz"]);
        assert!(matches!(
            settings.get("fizz"),
            Err(SettingsError::NotInstalled { .. })
        ));
        assert!(matches!(
            settings.uninstall("fizz"),
            Err(SettingsError::NotInstalled { .. })
        ));

        Ok(())
    }

    #[sealed_test]
    fn remove_keeps_launcher() -> anyhow::Result<()> {
        let root = current_dir()?;
        let mut settings = Settings::new(root.join("settings.json"));
        settings.install("fizz", root.join("gone"), Some(root.clone()), BTreeMap::new(), None)?;

        let definition = settings.remove("fizz")?;
        assert_eq!(definition.name, "fizz");
        assert!(root.join("fizz").exists());
        assert!(!settings.contains("fizz"));

        Ok(())
    }

    #[sealed_test]
    fn uninstall_many_checks_every_name_first() -> anyhow::Result<()> {
        let root = current_dir()?;
        let mut settings = Settings::new(root.join("settings.json"));
        settings.install("fizz", root.join("gone"), Some(root.clone()), BTreeMap::new(), None)?;
        settings.install("buzz", root.join("gone"), Some(root.clone()), BTreeMap::new(), None)?;

        let result = settings.uninstall_many(["fizz", "nope"]);
        assert!(matches!(result, Err(SettingsError::NotInstalled { name }) if name == "nope"));
        assert!(root.join("fizz").exists());
        assert_eq!(settings.names().collect::<Vec<_>>(), vec!["buzz", "fizz"]);

        let removed = settings.uninstall_many(["fizz", "buzz"])?;
        assert_eq!(removed.len(), 2);
        assert!(!root.join("fizz").exists());
        assert!(!root.join("buzz").exists());
        assert!(settings.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn uninstall_keeps_invalid_entry() -> anyhow::Result<()> {
        let root = current_dir()?;
        let file = root.join("settings.json");
        write(
            &file,
            indoc! {r#"
                {
                    "fizz": {
                        "home": "",
                        "name": "fizz",
                        "path": "/tmp"
                    }
                }"#},
        )?;
        let mut settings = Settings::load(&file)?;

        assert!(matches!(
            settings.uninstall("fizz"),
            Err(SettingsError::App(AppError::Home { .. }))
        ));
        assert!(settings.contains("fizz"));

        Ok(())
    }

    #[sealed_test]
    fn save_then_load_round_trip() -> anyhow::Result<()> {
        let root = current_dir()?;
        let file = root.join("settings.json");
        let mut settings = Settings::new(&file);
        settings.install(
            "fizz",
            "/tmp/fizz",
            Some(root.clone()),
            BTreeMap::from([("FIZZ".to_string(), "BUZZ".to_string())]),
            Some(GitSettings {
                remote: Some("origin".into()),
                branch: Some("main".into()),
                sleep: Some(2),
                auto_upgrade: true,
            }),
        )?;
        settings.install("buzz", "/tmp/buzz", Some(root), BTreeMap::new(), None)?;
        settings.save()?;

        let loaded = Settings::load(&file)?;
        assert_eq!(loaded, settings);
        assert_eq!(loaded.get("fizz")?, settings.get("fizz")?);

        Ok(())
    }

    #[sealed_test]
    fn save_on_exit_skips_save_on_error() -> anyhow::Result<()> {
        let root = current_dir()?;
        let file = root.join("settings.json");

        Settings::save_on_exit(&file, |settings| {
            settings.install("fizz", "/tmp/fizz", Some(root.clone()), BTreeMap::new(), None)
        })?;
        assert!(Settings::load(&file)?.contains("fizz"));

        let result = Settings::save_on_exit(&file, |settings| {
            settings.uninstall("fizz")?;
            settings.get("buzz")
        });
        assert!(matches!(result, Err(SettingsError::NotInstalled { .. })));
        assert!(Settings::load(&file)?.contains("fizz"));

        Ok(())
    }

    #[sealed_test]
    fn reset_deletes_file() -> anyhow::Result<()> {
        let file = current_dir()?.join("settings.json");
        Settings::load(&file)?;
        Settings::reset(&file)?;
        assert!(!file.exists());
        Settings::reset(&file)?;
        Ok(())
    }
}
