//! Install and control subproxy as a per-user OS service.
//!
//! Linux uses a systemd user unit, macOS a launchd agent.

use crate::config::DEFAULT_DATA_DIR;
use crate::types::{Result, SubproxyError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "subproxy-cli";
pub const LAUNCHD_LABEL: &str = "com.subproxy.cli";

const FALLBACK_PATHS: [&str; 5] = ["/usr/local/bin", "/usr/bin", "/bin", "/usr/sbin", "/sbin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
}

impl Platform {
    pub fn current() -> Result<Self> {
        match std::env::consts::OS {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::Darwin),
            other => Err(SubproxyError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// Whether a failing external command fails the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    Required,
    /// Failures are logged at debug level and never returned.
    BestEffort,
}

pub struct ServiceManager {
    platform: Platform,
    home: PathBuf,
}

impl ServiceManager {
    pub fn new(platform: Platform, home: PathBuf) -> Self {
        Self { platform, home }
    }

    pub fn detect() -> Result<Self> {
        let platform = Platform::current()?;
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| SubproxyError::Config("HOME is not set".to_string()))?;
        Ok(Self::new(platform, home))
    }

    pub fn systemd_unit_path(&self) -> PathBuf {
        self.home
            .join(".config")
            .join("systemd")
            .join("user")
            .join(format!("{}.service", SERVICE_NAME))
    }

    pub fn launchd_plist_path(&self) -> PathBuf {
        self.home
            .join("Library")
            .join("LaunchAgents")
            .join(format!("{}.plist", LAUNCHD_LABEL))
    }

    pub async fn install(&self, config_path: Option<&Path>) -> Result<()> {
        let config_path = config_path.map(absolute).transpose()?;
        let args = exec_args(config_path.as_deref())?;
        let working_dir = match config_path.as_deref().and_then(Path::parent) {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let log_dir = working_dir.join(DEFAULT_DATA_DIR).join("logs");
        tokio::fs::create_dir_all(&log_dir).await?;

        match self.platform {
            Platform::Linux => {
                let unit_path = self.systemd_unit_path();
                write_file(&unit_path, &build_systemd_unit(&args, &working_dir, &log_dir)).await?;
                run_command("systemctl", &["--user", "daemon-reload"], CommandMode::Required).await?;
                info!("Installed systemd user service at {}", unit_path.display());
            }
            Platform::Darwin => {
                let plist_path = self.launchd_plist_path();
                write_file(&plist_path, &build_launchd_plist(&args, &working_dir, &log_dir)).await?;
                info!("Installed launchd agent at {}", plist_path.display());
            }
        }
        Ok(())
    }

    pub async fn uninstall(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => {
                run_command("systemctl", &["--user", "stop", SERVICE_NAME], CommandMode::BestEffort).await?;
                run_command("systemctl", &["--user", "disable", SERVICE_NAME], CommandMode::BestEffort).await?;
                remove_file(&self.systemd_unit_path()).await?;
                run_command("systemctl", &["--user", "daemon-reload"], CommandMode::Required).await?;
                info!("Removed systemd user service.");
            }
            Platform::Darwin => {
                run_command("launchctl", &["bootout", &launchd_domain_label()], CommandMode::BestEffort).await?;
                remove_file(&self.launchd_plist_path()).await?;
                info!("Removed launchd agent.");
            }
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => self.systemctl("start").await,
            Platform::Darwin => {
                let plist_path = self.launchd_plist_path();
                let plist_path = plist_path.to_string_lossy();
                run_command("launchctl", &["bootstrap", &launchd_domain(), &plist_path], CommandMode::Required).await
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => self.systemctl("stop").await,
            Platform::Darwin => self.launchctl("bootout").await,
        }
    }

    pub async fn enable(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => self.systemctl("enable").await,
            Platform::Darwin => self.launchctl("enable").await,
        }
    }

    pub async fn disable(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => self.systemctl("disable").await,
            Platform::Darwin => self.launchctl("disable").await,
        }
    }

    pub async fn status(&self) -> Result<()> {
        match self.platform {
            Platform::Linux => self.systemctl("status").await,
            Platform::Darwin => self.launchctl("print").await,
        }
    }

    async fn systemctl(&self, action: &str) -> Result<()> {
        run_command("systemctl", &["--user", action, SERVICE_NAME], CommandMode::Required).await
    }

    async fn launchctl(&self, action: &str) -> Result<()> {
        run_command("launchctl", &[action, &launchd_domain_label()], CommandMode::Required).await
    }
}

/// Command line the service runs: this executable with `run` and, when
/// given, `--config <absolute path>`.
pub fn exec_args(config_path: Option<&Path>) -> Result<Vec<String>> {
    let exe = std::env::current_exe()?;
    let mut args = vec![exe.to_string_lossy().into_owned(), "run".to_string()];
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
    Ok(args)
}

pub fn build_systemd_unit(args: &[String], working_dir: &Path, log_dir: &Path) -> String {
    let exec_start = args.iter().map(|arg| escape_systemd_arg(arg)).collect::<Vec<_>>().join(" ");
    format!(
        "[Unit]\n\
         Description={name}\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         WorkingDirectory={working_dir}\n\
         ExecStart={exec_start}\n\
         Restart=on-failure\n\
         RestartSec=5\n\
         Environment={path}\n\
         StandardOutput=append:{log_dir}/service.log\n\
         StandardError=append:{log_dir}/service.err.log\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        name = SERVICE_NAME,
        working_dir = working_dir.display(),
        exec_start = exec_start,
        path = escape_systemd_arg(&format!("PATH={}", env_path())),
        log_dir = log_dir.display(),
    )
}

pub fn build_launchd_plist(args: &[String], working_dir: &Path, log_dir: &Path) -> String {
    let program_args = args
        .iter()
        .map(|arg| format!("    <string>{}</string>", escape_xml(arg)))
        .collect::<Vec<_>>()
        .join("\n");
    let log_dir = log_dir.to_string_lossy();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
{program_args}
  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>WorkingDirectory</key>
  <string>{working_dir}</string>
  <key>EnvironmentVariables</key>
  <dict>
    <key>PATH</key>
    <string>{path}</string>
  </dict>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
        label = LAUNCHD_LABEL,
        program_args = program_args,
        working_dir = escape_xml(&working_dir.to_string_lossy()),
        path = escape_xml(&env_path()),
        stdout = escape_xml(&format!("{}/service.log", log_dir)),
        stderr = escape_xml(&format!("{}/service.err.log", log_dir)),
    )
}

pub fn escape_systemd_arg(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | ':' | '-'));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('"', "\\\""))
    }
}

pub fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// PATH for the service: the current PATH plus common system directories,
/// deduplicated in order.
pub fn env_path() -> String {
    env_path_from(std::env::var("PATH").ok().as_deref())
}

pub fn env_path_from(current: Option<&str>) -> String {
    let mut entries: Vec<&str> = Vec::new();
    let current = current.unwrap_or("").split(':');
    for entry in current.chain(FALLBACK_PATHS) {
        if !entry.is_empty() && !entries.contains(&entry) {
            entries.push(entry);
        }
    }
    entries.join(":")
}

pub fn launchd_domain() -> String {
    format!("gui/{}", current_uid())
}

pub fn launchd_domain_label() -> String {
    format!("{}/{}", launchd_domain(), LAUNCHD_LABEL)
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Run an external command with inherited stdio and wait for it.
pub async fn run_command(program: &str, args: &[&str], mode: CommandMode) -> Result<()> {
    debug!("Running {} {}", program, args.join(" "));
    let outcome = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;

    let failure = match outcome {
        Ok(status) if status.success() => return Ok(()),
        Ok(status) => match status.code() {
            Some(code) => format!("{} exited with code {}", program, code),
            None => format!("{} was terminated by a signal", program),
        },
        Err(e) => format!("failed to run {}: {}", program, e),
    };

    match mode {
        CommandMode::Required => Err(SubproxyError::Process(failure)),
        CommandMode::BestEffort => {
            debug!("Ignoring failure: {}", failure);
            Ok(())
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
