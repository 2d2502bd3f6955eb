use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;

const ENTRY_NAME: &str = "rdc-agent";
const LAUNCH_AGENT_LABEL: &str = "com.rdc.agent";

#[derive(Debug, Error)]
pub enum AutostartError {
    #[error("no per-user startup location on this platform")]
    NoStartupLocation,
    #[error("cannot locate the agent executable: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("failed to write startup entry {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Registers the agent to launch at user login.
pub trait Autostart {
    /// Returns the path of the entry that was written.
    fn register(&self) -> Result<PathBuf, AutostartError>;
}

pub struct NoAutostart;

impl Autostart for NoAutostart {
    fn register(&self) -> Result<PathBuf, AutostartError> {
        Err(AutostartError::NoStartupLocation)
    }
}

/// What a login entry starts: the agent binary pointed at its config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub exe: PathBuf,
    /// Absolute; the login session's working directory is not ours.
    pub config: PathBuf,
}

impl LaunchCommand {
    pub fn new(exe: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            config: config.into(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        self.exe
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// A login entry ready to be written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupEntry {
    pub path: PathBuf,
    pub contents: String,
}

impl StartupEntry {
    /// `%APPDATA%\Microsoft\Windows\Start Menu\Programs\Startup\rdc-agent.cmd`
    pub fn windows(appdata: &Path, launch: &LaunchCommand) -> Self {
        let path = appdata
            .join("Microsoft")
            .join("Windows")
            .join("Start Menu")
            .join("Programs")
            .join("Startup")
            .join(format!("{ENTRY_NAME}.cmd"));
        let contents = format!(
            "@echo off\r\ncd /d \"{}\"\r\nstart \"\" \"{}\" --config \"{}\"\r\n",
            batch_escape(&launch.working_dir()),
            batch_escape(&launch.exe),
            batch_escape(&launch.config)
        );
        Self { path, contents }
    }

    /// `~/Library/LaunchAgents/com.rdc.agent.plist`
    pub fn launch_agent(home: &Path, launch: &LaunchCommand) -> Self {
        let path = home
            .join("Library")
            .join("LaunchAgents")
            .join(format!("{LAUNCH_AGENT_LABEL}.plist"));
        let contents = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCH_AGENT_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
        <string>--config</string>
        <string>{}</string>
    </array>
    <key>WorkingDirectory</key>
    <string>{}</string>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
            xml_escape(&launch.exe),
            xml_escape(&launch.config),
            xml_escape(&launch.working_dir())
        );
        Self { path, contents }
    }

    /// XDG `~/.config/autostart/rdc-agent.desktop`
    pub fn xdg_desktop(config_dir: &Path, launch: &LaunchCommand) -> Self {
        let path = config_dir
            .join("autostart")
            .join(format!("{ENTRY_NAME}.desktop"));
        let contents = format!(
            "[Desktop Entry]\nType=Application\nName=RDC Agent\nExec={} --config {}\nPath={}\nTerminal=false\nX-GNOME-Autostart-enabled=true\n",
            desktop_exec_arg(&launch.exe),
            desktop_exec_arg(&launch.config),
            desktop_string(&launch.working_dir())
        );
        Self { path, contents }
    }

    pub fn write(&self) -> Result<(), AutostartError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| AutostartError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, &self.contents).map_err(|source| AutostartError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Writes a login entry for the agent in the current user's
/// platform-specific startup location.
pub struct HostAutostart {
    exe: Option<PathBuf>,
    config: PathBuf,
}

impl HostAutostart {
    /// Launches the running executable with `config`.
    pub fn current(config: impl Into<PathBuf>) -> Self {
        Self {
            exe: None,
            config: config.into(),
        }
    }

    pub fn for_executable(exe: impl Into<PathBuf>, config: impl Into<PathBuf>) -> Self {
        Self {
            exe: Some(exe.into()),
            config: config.into(),
        }
    }

    fn launch_command(&self) -> Result<LaunchCommand, AutostartError> {
        let exe = match &self.exe {
            Some(exe) => exe.clone(),
            None => std::env::current_exe().map_err(AutostartError::CurrentExe)?,
        };
        Ok(LaunchCommand::new(exe, self.config.clone()))
    }

    fn entry(&self) -> Result<StartupEntry, AutostartError> {
        let launch = self.launch_command()?;
        let dirs = BaseDirs::new().ok_or(AutostartError::NoStartupLocation)?;
        if cfg!(windows) {
            // BaseDirs::config_dir is %APPDATA% (Roaming) on Windows.
            Ok(StartupEntry::windows(dirs.config_dir(), &launch))
        } else if cfg!(target_os = "macos") {
            Ok(StartupEntry::launch_agent(dirs.home_dir(), &launch))
        } else if cfg!(unix) {
            Ok(StartupEntry::xdg_desktop(dirs.config_dir(), &launch))
        } else {
            Err(AutostartError::NoStartupLocation)
        }
    }
}

impl Autostart for HostAutostart {
    fn register(&self) -> Result<PathBuf, AutostartError> {
        let entry = self.entry()?;
        entry.write()?;
        Ok(entry.path)
    }
}

fn xml_escape(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn batch_escape(path: &Path) -> String {
    path.display().to_string().replace('%', "%%")
}

/// Desktop entry string value: backslash is the only escape a path needs.
fn desktop_string(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}

/// One quoted `Exec` argument. Quoting escapes `"`, `` ` ``, `$` and `\`
/// with a backslash, and the string-level escape then doubles every
/// backslash again. `%` is a field code prefix and is written as `%%`.
fn desktop_exec_arg(path: &Path) -> String {
    let mut quoted = String::from("\"");
    for ch in path.display().to_string().chars() {
        match ch {
            '"' | '`' | '$' | '\\' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '%' => quoted.push_str("%%"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted.replace('\\', "\\\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_entry_lands_in_startup_folder() {
        let entry = StartupEntry::windows(
            Path::new("C:/Users/op/AppData/Roaming"),
            &LaunchCommand::new("C:/agent/rdc-agent.exe", "C:/ProgramData/100%/rdc.json"),
        );
        assert!(entry.path.ends_with("Start Menu/Programs/Startup/rdc-agent.cmd"));
        assert!(entry.contents.contains("cd /d \"C:/agent\""));
        assert!(entry.contents.contains(
            "start \"\" \"C:/agent/rdc-agent.exe\" --config \"C:/ProgramData/100%%/rdc.json\""
        ));
    }

    #[test]
    fn launch_agent_runs_at_load_with_config() {
        let entry = StartupEntry::launch_agent(
            Path::new("/Users/op"),
            &LaunchCommand::new("/opt/R&D/rdc-agent", "/etc/rdc.json"),
        );
        assert_eq!(
            entry.path,
            Path::new("/Users/op/Library/LaunchAgents/com.rdc.agent.plist")
        );
        assert!(entry.contents.contains("<key>RunAtLoad</key>"));
        assert!(entry.contents.contains(
            "<string>/opt/R&amp;D/rdc-agent</string>\n        <string>--config</string>\n        <string>/etc/rdc.json</string>"
        ));
        assert!(entry.contents.contains("<string>/opt/R&amp;D</string>"));
    }

    #[test]
    fn xdg_entry_is_written_under_autostart() {
        let dir = tempfile::tempdir().unwrap();
        let entry = StartupEntry::xdg_desktop(
            dir.path(),
            &LaunchCommand::new("/usr/local/bin/rdc-agent", "/etc/rdc.json"),
        );
        entry.write().unwrap();

        let written = fs::read_to_string(dir.path().join("autostart/rdc-agent.desktop")).unwrap();
        assert!(written.starts_with("[Desktop Entry]\n"));
        assert!(written.contains("Exec=\"/usr/local/bin/rdc-agent\" --config \"/etc/rdc.json\"\n"));
        assert!(written.contains("Path=/usr/local/bin\n"));
    }

    #[test]
    fn xdg_exec_escapes_reserved_characters() {
        let entry = StartupEntry::xdg_desktop(
            Path::new("/home/op/.config"),
            &LaunchCommand::new("/opt/$rdc/rdc-agent", "/home/op/a \"b\" `c` d\\e 50%.json"),
        );
        assert!(entry.contents.contains(
            r#"Exec="/opt/\\$rdc/rdc-agent" --config "/home/op/a \\"b\\" \\`c\\` d\\\\e 50%%.json""#
        ));
        assert!(entry.contents.contains("Path=/opt/$rdc\n"));
    }

    #[test]
    fn host_entry_passes_the_config_location() {
        let autostart = HostAutostart::for_executable("/opt/rdc/rdc-agent", "/etc/rdc.json");
        let launch = autostart.launch_command().unwrap();
        assert_eq!(launch, LaunchCommand::new("/opt/rdc/rdc-agent", "/etc/rdc.json"));

        if let Ok(entry) = autostart.entry() {
            assert!(entry.contents.contains("--config"));
            assert!(entry.contents.contains("/etc/rdc.json"));
        }
    }

    #[test]
    fn disabled_autostart_reports_no_location() {
        assert!(matches!(
            NoAutostart.register(),
            Err(AutostartError::NoStartupLocation)
        ));
    }
}
