//! Built-in firmware signing pipeline.
//!
//! Generates the key, build, sign and verify tasks for a set of firmware
//! binaries signed with MCUboot's `imgtool`:
//!
//! ```text
//! key_dir -> private_key -> public_key --+
//! fw_binaries ---------------------------+--> sig_fw_images:<stem> --> verify_fw_images:<stem>
//! sig_fw_dir ----------------------------+
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::logger::{debug, info};
use crate::task::{resolve_path, Command, Purge, Task, TaskRegistry, Verbosity};

pub const SIGN_FAMILY: &str = "sig_fw_images";
pub const VERIFY_FAMILY: &str = "verify_fw_images";

/// Image layout options handed to `imgtool sign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningLayout {
    pub header_size: u32,
    pub align: u32,
    pub slot_size: u32,
    pub erased_val: u8,
    /// Fixed load address (`-F`).
    pub rom_fixed: u32,
}

impl Default for SigningLayout {
    fn default() -> Self {
        Self {
            header_size: 0x80,
            align: 4,
            slot_size: 0xB0000,
            erased_val: 0xff,
            rom_fixed: 0x40000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwarePipeline {
    pub key_dir: PathBuf,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    /// Where the toolchain leaves `<stem>.bin`.
    pub firmware_dir: PathBuf,
    pub signed_dir: PathBuf,
    pub binaries: Vec<String>,
    pub build_file: PathBuf,
    pub toolchain: Vec<String>,
    /// Used instead of `toolchain` when its program is not installed.
    pub toolchain_fallback: Option<Vec<String>>,
    pub sign_tool: Vec<String>,
    pub version: String,
    pub layout: SigningLayout,
    /// Extra directories removed by the purge, besides keys and signed output.
    pub scratch_dirs: Vec<PathBuf>,
    /// Python requirements for the signing tool; adds an install task when set.
    pub requirements: Option<PathBuf>,
}

impl FirmwarePipeline {
    /// Conventional layout rooted at `root`.
    pub fn new(root: &Path) -> Self {
        let key_dir = root.join("keys");
        Self {
            private_key: key_dir.join("fw_private_key.pem"),
            public_key: key_dir.join("fw_public_key.pem"),
            key_dir,
            firmware_dir: root.join("zig-out").join("firmware"),
            signed_dir: root.join("signed"),
            binaries: vec!["lwm2m".to_string(), "mqtt".to_string()],
            build_file: root.join("build.zig"),
            toolchain: vec!["zig".to_string(), "build".to_string()],
            toolchain_fallback: Some(
                ["python3", "-m", "ziglang", "build"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            sign_tool: vec!["imgtool".to_string()],
            version: "0.0.0".to_string(),
            layout: SigningLayout::default(),
            scratch_dirs: vec![root.join("zig-out"), root.join("zig-cache")],
            requirements: None,
        }
    }

    /// Re-roots every relative path in the pipeline under `root`.
    pub fn rooted(mut self, root: &Path) -> Self {
        let fix = |path: &mut PathBuf| *path = resolve_path(root, &path.to_string_lossy());
        fix(&mut self.key_dir);
        fix(&mut self.private_key);
        fix(&mut self.public_key);
        fix(&mut self.firmware_dir);
        fix(&mut self.signed_dir);
        fix(&mut self.build_file);
        for dir in &mut self.scratch_dirs {
            fix(dir);
        }
        if let Some(requirements) = self.requirements.as_mut() {
            fix(requirements);
        }
        self
    }

    /// Swaps in the fallback toolchain when the primary one is not installed.
    pub fn resolve_toolchain(mut self, locate: impl Fn(&str) -> bool) -> Self {
        let installed = self.toolchain.first().is_some_and(|program| locate(program));
        if !installed {
            if let Some(fallback) = self.toolchain_fallback.take() {
                debug!(
                    "'{}' not found, building with '{}'",
                    self.toolchain.join(" "),
                    fallback.join(" ")
                );
                self.toolchain = fallback;
            }
        }
        self
    }

    pub fn binary_path(&self, stem: &str) -> PathBuf {
        self.firmware_dir.join(format!("{stem}.bin"))
    }

    pub fn signed_path(&self, stem: &str) -> PathBuf {
        self.signed_dir.join(format!("{stem}_sig.bin"))
    }

    /// `imgtool sign` argument vector for one binary.
    pub fn sign_command(&self, stem: &str) -> Command {
        let layout = &self.layout;
        let mut argv = self.sign_tool.clone();
        argv.extend([
            "sign".to_string(),
            "-v".to_string(),
            self.version.clone(),
            "-F".to_string(),
            format!("{:#x}", layout.rom_fixed),
            "-R".to_string(),
            format!("{:#x}", layout.erased_val),
            "--header-size".to_string(),
            format!("{:#x}", layout.header_size),
            "--pad-header".to_string(),
            "-k".to_string(),
            path_arg(&self.private_key),
            "--overwrite-only".to_string(),
            "--public-key-format".to_string(),
            "full".to_string(),
            "-S".to_string(),
            format!("{:#X}", layout.slot_size),
            "--align".to_string(),
            layout.align.to_string(),
            path_arg(&self.binary_path(stem)),
            path_arg(&self.signed_path(stem)),
        ]);
        Command::Argv(argv)
    }

    pub fn dump_command(&self, stem: &str) -> Command {
        let mut argv = self.sign_tool.clone();
        argv.push("dumpinfo".to_string());
        argv.push(path_arg(&self.signed_path(stem)));
        Command::Argv(argv)
    }

    pub fn verify_command(&self, stem: &str) -> Command {
        let mut argv = self.sign_tool.clone();
        argv.extend([
            "verify".to_string(),
            "-k".to_string(),
            path_arg(&self.public_key),
            path_arg(&self.signed_path(stem)),
        ]);
        Command::Argv(argv)
    }

    /// The standalone tasks, in declaration order. Family members are
    /// returned by `sign_tasks` and `verify_tasks`.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = vec![
            Task::new("key_dir")
                .description("Create key directory.")
                .action(mkdir(&self.key_dir))
                .target(&self.key_dir),
            Task::new("private_key")
                .description("Create private key.")
                .action(Command::argv([
                    "openssl".to_string(),
                    "ecparam".to_string(),
                    "-genkey".to_string(),
                    "-name".to_string(),
                    "prime256v1".to_string(),
                    "-noout".to_string(),
                    "-out".to_string(),
                    path_arg(&self.private_key),
                ]))
                .file_dep(&self.key_dir)
                .target(&self.private_key),
            Task::new("public_key")
                .description("Generate public key.")
                .action(Command::argv([
                    "openssl".to_string(),
                    "ec".to_string(),
                    "-in".to_string(),
                    path_arg(&self.private_key),
                    "-pubout".to_string(),
                    "-out".to_string(),
                    path_arg(&self.public_key),
                ]))
                .file_dep(&self.private_key)
                .target(&self.public_key)
                .cleanable(true)
                .verbosity(Verbosity::Always),
        ];

        let mut build = Task::new("fw_binaries")
            .description("Build firmware binaries.")
            .action(Command::Argv(self.toolchain.clone()))
            .file_dep(&self.build_file)
            .cleanable(true)
            .verbosity(Verbosity::Always);
        for stem in &self.binaries {
            build = build.target(self.binary_path(stem));
        }
        tasks.push(build);

        tasks.push(
            Task::new("sig_fw_dir")
                .description("Create signed firmware directory.")
                .action(mkdir(&self.signed_dir))
                .target(&self.signed_dir),
        );

        if let Some(requirements) = &self.requirements {
            let mut argv = vec![
                "python3".to_string(),
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "--upgrade".to_string(),
                "-r".to_string(),
            ];
            argv.push(path_arg(requirements));
            tasks.push(
                Task::new("mcuboot_deps")
                    .description("Install signing tool dependencies.")
                    .action(Command::Argv(argv))
                    .file_dep(requirements),
            );
        }
        tasks
    }

    /// One signing task per binary, named by stem.
    pub fn sign_tasks(&self) -> Vec<Task> {
        self.binaries
            .iter()
            .map(|stem| {
                Task::new(stem.as_str())
                    .description(format!("Sign {} firmware image.", stem))
                    .action(self.sign_command(stem))
                    .report(self.dump_command(stem))
                    .file_dep(&self.public_key)
                    .file_dep(self.binary_path(stem))
                    .file_dep(&self.signed_dir)
                    .target(self.signed_path(stem))
                    .cleanable(true)
                    .verbosity(Verbosity::Always)
            })
            .collect()
    }

    /// One verification task per signed image, named by stem.
    pub fn verify_tasks(&self) -> Vec<Task> {
        self.binaries
            .iter()
            .map(|stem| {
                Task::new(stem.as_str())
                    .description(format!("Verify {} firmware image.", stem))
                    .action(self.verify_command(stem))
                    .file_dep(&self.public_key)
                    .file_dep(self.signed_path(stem))
                    .verbosity(Verbosity::Always)
            })
            .collect()
    }

    pub fn purge(&self) -> Purge {
        let mut dirs = vec![self.key_dir.clone(), self.signed_dir.clone()];
        dirs.extend(self.scratch_dirs.iter().cloned());
        Purge {
            name: "purge".to_string(),
            description: Some("Remove keys, signed images and build output.".to_string()),
            dirs,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binaries.is_empty() {
            return Err(ConfigError::Invalid(
                "firmware pipeline needs at least one binary".to_string(),
            ));
        }
        if let Some(stem) = self
            .binaries
            .iter()
            .find(|stem| stem.trim().is_empty() || stem.contains(':'))
        {
            return Err(ConfigError::Invalid(format!(
                "invalid firmware binary name '{}'",
                stem
            )));
        }
        if self.toolchain.is_empty() || self.sign_tool.is_empty() {
            return Err(ConfigError::Invalid(
                "firmware pipeline needs a toolchain and a signing tool command".to_string(),
            ));
        }
        Ok(())
    }

    /// Adds every pipeline task, both families and the purge to `registry`.
    pub fn register(&self, registry: &mut TaskRegistry) -> Result<(), ConfigError> {
        self.validate()?;
        for task in self.tasks() {
            registry.register(task)?;
        }
        registry.register_family(
            SIGN_FAMILY,
            Some("Create signed firmware images.".to_string()),
            self.sign_tasks(),
        )?;
        registry.register_family(
            VERIFY_FAMILY,
            Some("Verify signed firmware images.".to_string()),
            self.verify_tasks(),
        )?;
        registry.register_purge(self.purge())?;
        info!(
            "firmware pipeline registered for {} binar{}",
            self.binaries.len(),
            if self.binaries.len() == 1 { "y" } else { "ies" }
        );
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mkdir(dir: &Path) -> Command {
    Command::argv(["mkdir".to_string(), "-p".to_string(), path_arg(dir)])
}
