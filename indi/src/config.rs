//! Per-device configuration files
//!
//! A config file is an `<INDIDriver>` element holding the client-form
//! (`new*Vector`) rendering of every saved property. Loading replays those
//! directives through the [`Dispatcher`] as if a client had sent them, so
//! drivers validate saved values with the same code paths as live ones.
//!
//! The file is `$INDICONFIG` when set, otherwise
//! `$HOME/.indi/<device>_config.xml`.

use std::ffi::OsString;
use std::fs::{self, DirBuilder, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use crate::context::IndiContext;
use crate::dispatcher::{Dispatcher, Driver};
use crate::error::{IndiError, IndiResult};
use crate::numfmt::scan_sexa;
use crate::property::{BlobVector, NumberVector, SwitchVector, TextVector};
use crate::protocol::SwitchState;
use crate::wire;
use crate::xml::{parse_elements, XmlElement};

pub const CONFIG_ENV: &str = "INDICONFIG";
const CONFIG_DIR: &str = ".indi";
const ROOT_TAG: &str = "INDIDriver";

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    path: PathBuf,
    default_path: PathBuf,
}

impl ConfigFile {
    /// Config file for `device` from an explicit override or the
    /// environment.
    pub fn resolve(override_path: Option<&Path>, device: &str) -> IndiResult<Self> {
        Self::resolve_with(
            override_path,
            std::env::var_os(CONFIG_ENV),
            dirs::home_dir(),
            device,
        )
    }

    /// Resolution with the environment passed in.
    pub fn resolve_with(
        override_path: Option<&Path>,
        env_path: Option<OsString>,
        home: Option<PathBuf>,
        device: &str,
    ) -> IndiResult<Self> {
        let path = match (override_path, env_path) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) if !p.is_empty() => PathBuf::from(p),
            _ => {
                let home = home.ok_or_else(|| {
                    IndiError::Config("Unable to locate home directory".to_string())
                })?;
                home.join(CONFIG_DIR).join(format!("{}_config.xml", device))
            }
        };
        let mut default_path = path.clone().into_os_string();
        default_path.push(".default");
        Ok(Self {
            path,
            default_path: PathBuf::from(default_path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where [`ConfigFile::save_default`] keeps the pristine copy.
    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    /// The saved default copy, readable like any other config file.
    pub fn defaults(&self) -> ConfigFile {
        ConfigFile {
            path: self.default_path.clone(),
            default_path: self.default_path.clone(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create the config directory if needed and refuse files a non-root
    /// process could not rewrite.
    fn check_access(&self) -> IndiResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o775)
                    .create(dir)
                    .map_err(|e| {
                        IndiError::Config(format!(
                            "Unable to create config directory. Error {}: {}",
                            dir.display(),
                            e
                        ))
                    })?;
            }
        }

        if let Ok(meta) = fs::metadata(&self.path) {
            let uid = nix::unistd::getuid();
            let gid = nix::unistd::getgid();
            if (meta.uid() == 0 && !uid.is_root()) || (meta.gid() == 0 && gid.as_raw() != 0) {
                return Err(IndiError::ConfigOwnedByRoot(self.path.clone()));
            }
        }
        Ok(())
    }

    fn load(&self) -> IndiResult<Vec<XmlElement>> {
        self.check_access()?;
        let text = fs::read_to_string(&self.path).map_err(|e| {
            IndiError::Config(format!(
                "Unable to open config file. Error loading file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let mut roots = parse_elements(&text)
            .map_err(|e| IndiError::Config(format!("Unable to parse config XML: {}", e)))?;
        match roots.iter().position(|r| r.tag == ROOT_TAG) {
            Some(i) => Ok(roots.swap_remove(i).children),
            None => Err(IndiError::Config(format!(
                "Unable to parse config XML: missing <{}>",
                ROOT_TAG
            ))),
        }
    }

    /// Saved directive for one property of `device`.
    fn find_vector(&self, device: &str, property: &str) -> IndiResult<Option<XmlElement>> {
        for directive in self.load()? {
            let (rdev, rname) = directive.crack_dn()?;
            if rdev == device && rname == property {
                return Ok(Some(directive));
            }
        }
        Ok(None)
    }

    /// Replay saved directives for `device` through the dispatcher.
    ///
    /// With `property` set only that directive is applied. Directives for
    /// properties not defined yet are skipped, and per-directive dispatch
    /// errors are logged.
    pub fn read<D: Driver + ?Sized>(
        &self,
        ctx: &IndiContext,
        dispatcher: &Dispatcher,
        driver: &mut D,
        device: &str,
        property: Option<&str>,
        silent: bool,
    ) -> IndiResult<()> {
        let directives = self.load()?;
        let announce = !directives.is_empty() && !silent;

        if announce {
            ctx.message(Some(device), "[INFO] Loading device configuration...")?;
        }
        for directive in &directives {
            let (rdev, rname) = directive.crack_dn()?;
            if rdev != device {
                continue;
            }
            if property.map_or(true, |p| p == rname) {
                if ctx.find_property(rdev, rname).is_none() {
                    tracing::debug!("Config {}.{} skipped: not defined yet", rdev, rname);
                } else if let Err(e) = dispatcher.dispatch(ctx, driver, directive) {
                    tracing::debug!("Config {}.{} not applied: {}", rdev, rname, e);
                }
                if property.is_some() {
                    break;
                }
            }
        }
        if announce {
            ctx.message(Some(device), "[INFO] Device configuration applied.")?;
        }
        tracing::info!("Loaded configuration from {}", self.path.display());
        Ok(())
    }

    /// Start a new file, replacing any existing one.
    pub fn writer(
        &self,
        ctx: &IndiContext,
        device: &str,
        silent: bool,
    ) -> IndiResult<ConfigWriter> {
        self.check_access()?;
        let file = File::create(&self.path).map_err(|e| {
            IndiError::Config(format!(
                "Unable to open config file. Error loading file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let mut out = BufWriter::new(file);
        writeln!(out, "<{}>", ROOT_TAG)?;
        if !silent {
            ctx.message(Some(device), "[INFO] Saving device configuration...")?;
        }
        Ok(ConfigWriter {
            out,
            device: device.to_string(),
            silent,
        })
    }

    pub fn purge(&self) -> IndiResult<()> {
        fs::remove_file(&self.path).map_err(|e| {
            IndiError::Config(format!(
                "Unable to purge configuration file {}. Error {}",
                self.path.display(),
                e
            ))
        })?;
        tracing::info!("Purged {}", self.path.display());
        Ok(())
    }

    /// Keep a copy of the current file as the default, once. An existing
    /// default is never overwritten.
    pub fn save_default(&self) -> IndiResult<()> {
        if self.default_path.exists() {
            return Ok(());
        }
        fs::copy(&self.path, &self.default_path).map_err(|e| {
            IndiError::Config(format!(
                "Unable to create default config {}: {}",
                self.default_path.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn get_number(
        &self,
        device: &str,
        property: &str,
        member: &str,
    ) -> IndiResult<Option<f64>> {
        Ok(self
            .find_vector(device, property)?
            .and_then(|v| member_text(&v, "Number", member).and_then(scan_sexa)))
    }

    pub fn get_text(
        &self,
        device: &str,
        property: &str,
        member: &str,
    ) -> IndiResult<Option<String>> {
        Ok(self
            .find_vector(device, property)?
            .and_then(|v| member_text(&v, "Text", member).map(str::to_string)))
    }

    pub fn get_switch(
        &self,
        device: &str,
        property: &str,
        member: &str,
    ) -> IndiResult<Option<SwitchState>> {
        Ok(self
            .find_vector(device, property)?
            .and_then(|v| member_text(&v, "Switch", member).and_then(SwitchState::parse)))
    }

    /// Position of the first saved `On` switch.
    pub fn get_on_switch_index(&self, device: &str, property: &str) -> IndiResult<Option<usize>> {
        Ok(self.find_vector(device, property)?.and_then(|v| {
            v.members("Switch")
                .position(|m| SwitchState::parse(m.pcdata()) == Some(SwitchState::On))
        }))
    }
}

fn member_text<'a>(vector: &'a XmlElement, suffix: &'a str, member: &str) -> Option<&'a str> {
    vector
        .members(suffix)
        .find(|m| m.attr("name") == Some(member))
        .map(|m| m.pcdata())
}

/// An open config file being written.
///
/// Call [`ConfigWriter::finish`] to close the root element; dropping the
/// writer early leaves a truncated file that fails to load.
pub struct ConfigWriter {
    out: BufWriter<File>,
    device: String,
    silent: bool,
}

impl ConfigWriter {
    pub fn save_number(&mut self, nvp: &NumberVector) -> IndiResult<()> {
        self.out.write_all(wire::new_number_xml(nvp).as_bytes())?;
        Ok(())
    }

    pub fn save_text(&mut self, tvp: &TextVector) -> IndiResult<()> {
        self.out.write_all(wire::new_text_xml(tvp).as_bytes())?;
        Ok(())
    }

    pub fn save_switch(&mut self, svp: &SwitchVector) -> IndiResult<()> {
        self.out.write_all(wire::new_switch_xml(svp).as_bytes())?;
        Ok(())
    }

    pub fn save_blob(&mut self, bvp: &BlobVector) -> IndiResult<()> {
        self.out.write_all(wire::new_blob_xml(bvp).as_bytes())?;
        Ok(())
    }

    pub fn finish(mut self, ctx: &IndiContext) -> IndiResult<()> {
        writeln!(self.out, "</{}>", ROOT_TAG)?;
        self.out.flush()?;
        if !self.silent {
            ctx.message(Some(&self.device), "[INFO] Device configuration saved.")?;
        }
        Ok(())
    }
}
