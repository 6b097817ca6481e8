// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compose project handling.
//!
//! Dip does not orchestrate containers itself. It hands that off to
//! docker-compose, and only needs to know enough about a compose project to
//! check that an application actually resolves to a service definition.
//!
//! # Compose File Discovery
//!
//! Compose files are discovered the same way docker-compose does it. Starting
//! at the application's home, look for `docker-compose.yml` or
//! `docker-compose.yaml`, moving up through parent directories until one is
//! found. An override file named `docker-compose.override.yml` or
//! `docker-compose.override.yaml` sitting next to it is layered on top.
//!
//! # Service Definitions
//!
//! Services are read from the top-level `services` mapping. Version-less
//! compose files from the v1 era have no such mapping, so every top-level key
//! is treated as a service instead. Service definitions found in an override
//! file are shallowly merged into the base definition.
//!
//! # Networks
//!
//! Networks are named after the project, which is the directory holding the
//! compose file unless `$COMPOSE_PROJECT_NAME` says otherwise. Only networks
//! are ever torn down by dip. Containers of the project are left alone, since
//! other applications may share the same compose file.

use serde_yaml::{Mapping, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    ffi::OsStr,
    fs::read_to_string,
    path::{absolute, Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument, warn};

/// Program used to orchestrate containers.
pub const COMPOSE_BIN: &str = "docker-compose";

/// Program used to manage networks.
pub const DOCKER_BIN: &str = "docker";

/// Environment variable overriding the project name.
pub const PROJECT_NAME_ENV: &str = "COMPOSE_PROJECT_NAME";

/// Supported compose file names in order of preference.
pub const SUPPORTED_FILENAMES: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

/// Supported compose override file names in order of preference.
pub const OVERRIDE_FILENAMES: [&str; 2] = [
    "docker-compose.override.yml",
    "docker-compose.override.yaml",
];

/// Discover default compose files for a directory.
///
/// Returns an empty listing if no compose file can be found in the directory
/// or any of its parents.
pub fn default_config_files(base: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut dir = Some(base.as_ref());
    while let Some(current) = dir {
        let candidates = existing_files(current, SUPPORTED_FILENAMES);
        if let Some(config) = candidates.first() {
            if candidates.len() > 1 {
                warn!(
                    "found multiple compose files in {:?}, using {:?}",
                    current.display(),
                    config.display()
                );
            }

            let mut files = vec![config.clone()];
            files.extend(existing_files(current, OVERRIDE_FILENAMES).into_iter().take(1));
            return files;
        }

        dir = current.parent();
    }

    Vec::new()
}

fn existing_files(dir: &Path, names: [&str; 2]) -> Vec<PathBuf> {
    names
        .into_iter()
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// Compose project of an application.
#[derive(Debug, Clone)]
pub struct Project {
    home: PathBuf,
    name: String,
    files: Vec<PathBuf>,
    services: BTreeMap<String, Value>,
    networks: BTreeMap<String, Value>,
}

impl Project {
    /// Open compose project at target directory.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::ComposeFileNotFound`] if no compose file
    ///   exists for target directory.
    /// - Return [`ComposeError::Read`] or [`ComposeError::Parse`] if a compose
    ///   file cannot be loaded.
    #[instrument(skip(home), level = "debug")]
    pub fn open(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let files = default_config_files(&home);
        if files.is_empty() {
            return Err(ComposeError::ComposeFileNotFound { path: home });
        }

        let mut services = BTreeMap::new();
        let mut networks = BTreeMap::new();
        for file in &files {
            debug!("load compose file {:?}", file.display());
            let content = read_to_string(file).map_err(|source| ComposeError::Read {
                source,
                path: file.clone(),
            })?;
            let document: Value =
                serde_yaml::from_str(&content).map_err(|source| ComposeError::Parse {
                    source,
                    path: file.clone(),
                })?;
            merge_layer(&mut networks, networks_of(&document));
            merge_layer(&mut services, services_of(document, file)?);
        }

        // INVARIANT: Project is named after directory of base compose file.
        let name = project_name(files[0].parent().unwrap_or(&home));

        Ok(Self {
            home,
            name,
            files,
            services,
            networks,
        })
    }

    /// Compose files making up this project.
    pub fn files(&self) -> &[PathBuf] {
        self.files.as_slice()
    }

    /// Name docker-compose gives to project.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Docker names of networks created for project.
    ///
    /// Includes the implicit default network. External networks are not
    /// owned by the project, and are skipped.
    pub fn network_names(&self) -> Vec<String> {
        let mut names = BTreeSet::from([format!("{}_default", self.name)]);
        for (key, definition) in &self.networks {
            let external = match definition.get("external") {
                Some(Value::Bool(external)) => *external,
                Some(Value::Mapping(_)) => true,
                _ => false,
            };
            if external {
                names.remove(&format!("{}_{key}", self.name));
                continue;
            }

            match definition.get("name").and_then(Value::as_str) {
                Some(name) => {
                    if key == "default" {
                        names.remove(&format!("{}_default", self.name));
                    }
                    names.insert(name.to_owned());
                }
                None => {
                    names.insert(format!("{}_{key}", self.name));
                }
            }
        }

        names.into_iter().collect()
    }

    /// Look up service by name.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::NoSuchService`] if no service by that name is
    ///   defined.
    pub fn service(&self, name: &str) -> Result<Service<'_>> {
        self.services
            .get_key_value(name)
            .map(|(name, definition)| Service {
                project: self,
                name,
                definition,
            })
            .ok_or_else(|| ComposeError::NoSuchService { name: name.into() })
    }

    /// Tear down networks of project.
    ///
    /// Networks that do not exist are skipped. Containers are never touched,
    /// so a network still in use by a running container fails to be removed.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::Syscall`] if docker cannot be called, or
    ///   fails to remove an existing network.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_networks(&self) -> Result<()> {
        for network in self.network_names() {
            match syscall(DOCKER_BIN, &self.home, ["network", "rm", network.as_str()]) {
                Ok(_) => debug!("removed network {network:?}"),
                Err(ComposeError::Syscall { source, .. }) if is_missing_network(&source) => {
                    debug!("network {network:?} already gone");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }
}

/// Service defined in a compose project.
#[derive(Debug, Clone, Copy)]
pub struct Service<'p> {
    project: &'p Project,
    name: &'p str,
    definition: &'p Value,
}

impl Service<'_> {
    /// Name of service.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Full service definition as JSON.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::Convert`] if the definition uses keys that
    ///   have no JSON equivalent.
    pub fn config_dict(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self.definition).map_err(|source| ComposeError::Convert {
            source,
            name: self.name.into(),
        })
    }

    /// Pull image of service.
    ///
    /// # Errors
    ///
    /// - Return [`ComposeError::Syscall`] if docker-compose cannot be called,
    ///   or fails.
    #[instrument(skip(self), level = "debug")]
    pub fn pull(&self) -> Result<()> {
        let status = Command::new(COMPOSE_BIN)
            .current_dir(&self.project.home)
            .args(["pull", self.name])
            .status()
            .map_err(|source| ComposeError::Syscall {
                source,
                command: format!("{COMPOSE_BIN} pull {}", self.name),
            })?;

        if !status.success() {
            return Err(ComposeError::Syscall {
                source: std::io::Error::other(format!("exited with {status}")),
                command: format!("{COMPOSE_BIN} pull {}", self.name),
            });
        }

        Ok(())
    }
}

fn services_of(document: Value, path: &Path) -> Result<Mapping> {
    match document {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(mut top) => match top.remove("services") {
            Some(Value::Mapping(services)) => Ok(services),
            Some(Value::Null) => Ok(Mapping::new()),
            Some(_) => Err(ComposeError::Invalid {
                path: path.to_path_buf(),
            }),
            None if top.contains_key("version") => Ok(Mapping::new()),
            None => Ok(top),
        },
        _ => Err(ComposeError::Invalid {
            path: path.to_path_buf(),
        }),
    }
}

fn networks_of(document: &Value) -> Mapping {
    // INVARIANT: Version-less files have no top-level networks.
    match (document.get("services"), document.get("networks")) {
        (Some(_), Some(Value::Mapping(networks))) => networks.clone(),
        _ => Mapping::new(),
    }
}

fn merge_layer(entries: &mut BTreeMap<String, Value>, layer: Mapping) {
    for (name, definition) in layer {
        let Some(name) = name.as_str().map(str::to_owned) else {
            continue;
        };

        // INVARIANT: A network declared without options is just a null value.
        let definition = match definition {
            Value::Null => Value::Mapping(Mapping::new()),
            definition => definition,
        };

        let replacement = match (entries.get_mut(&name), definition) {
            (Some(Value::Mapping(base)), Value::Mapping(extra)) => {
                for (key, value) in extra {
                    base.insert(key, value);
                }
                None
            }
            (_, definition) => Some(definition),
        };

        if let Some(definition) = replacement {
            entries.insert(name, definition);
        }
    }
}

fn project_name(dir: &Path) -> String {
    let name = match env::var(PROJECT_NAME_ENV) {
        Ok(name) if !name.is_empty() => name,
        _ => absolute(dir)
            .ok()
            .and_then(|dir| dir.file_name().map(|name| name.to_string_lossy().into_owned()))
            .unwrap_or_default(),
    };

    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

fn is_missing_network(error: &std::io::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("no such network") || message.contains("not found")
}

fn syscall(
    program: &str,
    dir: &Path,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<String> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    let command = format!(
        "{program} {}",
        args.iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    let output = Command::new(program)
        .current_dir(dir)
        .args(&args)
        .output()
        .map_err(|source| ComposeError::Syscall {
            source,
            command: command.clone(),
        })?;

    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let message = format!("{stdout}{stderr}").trim_end().to_string();

    if !output.status.success() {
        return Err(ComposeError::Syscall {
            source: std::io::Error::other(message),
            command,
        });
    }

    Ok(message)
}

/// Compose project error types.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// No compose file found for directory.
    #[error("no compose file found in {:?}", path.display())]
    ComposeFileNotFound { path: PathBuf },

    /// No service of given name defined in compose files.
    #[error("no service named {name:?} found in compose file")]
    NoSuchService { name: String },

    /// Compose file cannot be read.
    #[error("failed to read compose file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Compose file is not valid YAML.
    #[error("failed to parse compose file {:?}", path.display())]
    Parse {
        #[source]
        source: serde_yaml::Error,
        path: PathBuf,
    },

    /// Compose file is valid YAML, but not a compose file.
    #[error("compose file {:?} has invalid layout", path.display())]
    Invalid { path: PathBuf },

    /// Service definition cannot be expressed as JSON.
    #[error("failed to convert definition of service {name:?}")]
    Convert {
        #[source]
        source: serde_json::Error,
        name: String,
    },

    /// Call to docker or docker-compose failed.
    #[error("command {command:?} failed")]
    Syscall {
        #[source]
        source: std::io::Error,
        command: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ComposeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use serde_json::json;
    use std::{
        env::current_dir,
        fs::{create_dir_all, write},
    };

    #[sealed_test]
    fn discover_config_files() -> anyhow::Result<()> {
        let root = current_dir()?;
        let nested = root.join("nested").join("deeper");
        create_dir_all(&nested)?;
        write(root.join("docker-compose.yml"), "")?;
        write(root.join("docker-compose.override.yaml"), "")?;

        let expect = vec![
            root.join("docker-compose.yml"),
            root.join("docker-compose.override.yaml"),
        ];
        assert_eq!(default_config_files(&root), expect);
        assert_eq!(default_config_files(&nested), expect);

        Ok(())
    }

    #[sealed_test]
    fn missing_compose_file() -> anyhow::Result<()> {
        let home = current_dir()?.join("fizz");
        create_dir_all(&home)?;
        let result = Project::open(&home);
        assert!(matches!(
            result,
            Err(ComposeError::ComposeFileNotFound { .. })
        ));
        Ok(())
    }

    #[sealed_test]
    fn resolve_service_with_override() -> anyhow::Result<()> {
        let root = current_dir()?;
        write(
            root.join("docker-compose.yml"),
            indoc! {r#"
                version: "3"
                services:
                  fizz:
                    image: fizz:latest
                    entrypoint: ["fizz"]
                  buzz:
                    image: buzz
            "#},
        )?;
        write(
            root.join("docker-compose.override.yml"),
            indoc! {r#"
                services:
                  fizz:
                    image: fizz:edge
            "#},
        )?;

        let project = Project::open(&root)?;
        assert_eq!(project.service("buzz")?.name(), "buzz");

        let result = project.service("fizz")?.config_dict()?;
        let expect = json!({"image": "fizz:edge", "entrypoint": ["fizz"]});
        assert_eq!(result, expect);

        let result = project.service("jazz");
        assert!(matches!(result, Err(ComposeError::NoSuchService { .. })));

        Ok(())
    }

    #[sealed_test]
    fn resolve_service_version_one() -> anyhow::Result<()> {
        let root = current_dir()?;
        write(
            root.join("docker-compose.yaml"),
            indoc! {r#"
                fizz:
                  image: fizz
            "#},
        )?;

        let project = Project::open(&root)?;
        assert_eq!(project.service("fizz")?.name(), "fizz");

        Ok(())
    }

    #[sealed_test(env = [("COMPOSE_PROJECT_NAME", "")])]
    fn project_networks() -> anyhow::Result<()> {
        let home = current_dir()?.join("Fizz App");
        create_dir_all(&home)?;
        write(
            home.join("docker-compose.yml"),
            indoc! {r#"
                services:
                  fizz:
                    image: fizz
                networks:
                  backend:
                  shared:
                    external: true
                  legacy:
                    name: legacy-net
            "#},
        )?;
        write(
            home.join("docker-compose.override.yml"),
            indoc! {r#"
                services:
                  fizz:
                    image: fizz:edge
                networks:
                  frontend: {}
            "#},
        )?;

        let project = Project::open(&home)?;
        assert_eq!(project.name(), "fizzapp");
        assert_eq!(
            project.network_names(),
            [
                "fizzapp_backend",
                "fizzapp_default",
                "fizzapp_frontend",
                "legacy-net"
            ]
        );

        Ok(())
    }

    #[sealed_test(env = [("COMPOSE_PROJECT_NAME", "Buzz_Project")])]
    fn project_name_from_env() -> anyhow::Result<()> {
        let root = current_dir()?;
        write(
            root.join("docker-compose.yml"),
            indoc! {r#"
                fizz:
                  image: fizz
                networks:
                  image: networks
            "#},
        )?;

        let project = Project::open(&root)?;
        assert_eq!(project.name(), "buzz_project");
        assert_eq!(project.network_names(), ["buzz_project_default"]);
        assert!(project.service("networks").is_ok());

        Ok(())
    }

    #[sealed_test]
    fn invalid_compose_file() -> anyhow::Result<()> {
        let root = current_dir()?;
        write(root.join("docker-compose.yml"), "services: [fizz]\n")?;
        assert!(matches!(
            Project::open(&root),
            Err(ComposeError::Invalid { .. })
        ));

        write(root.join("docker-compose.yml"), "services: {fizz: [\n")?;
        assert!(matches!(
            Project::open(&root),
            Err(ComposeError::Parse { .. })
        ));

        Ok(())
    }
}
