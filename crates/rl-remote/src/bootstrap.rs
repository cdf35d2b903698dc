//! Remote agent bootstrap
//!
//! Detects the remote architecture, installs a versioned agent when it is
//! missing and starts it bound to loopback. Every script is plain POSIX `sh`
//! run through `sh -c` so the login shell does not matter.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use rl_core::config::AgentConfig;
use rl_core::{AgentInfo, Architecture, ConnectionToken, ExecError};
use rl_protocol::PortDiscovery;

use crate::error::BootstrapError;
use crate::executor::RemoteExecutor;
use crate::watcher::watch_output;

/// Download attempts before the install gives up
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Pause between download attempts, in seconds
pub const DOWNLOAD_RETRY_DELAY_SECS: u32 = 2;

/// Marker the start script prints before the agent's own output
const PID_MARKER: &str = "roamlink-agent-pid:";

static VERSION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("version pattern is valid"));

static PID_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{} (\d+)", regex::escape(PID_MARKER))).expect("pid pattern is valid")
});

/// Quote a string for POSIX `sh`
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Installs and starts the remote agent
pub struct EnvironmentBootstrapper {
    executor: RemoteExecutor,
    config: AgentConfig,
}

impl EnvironmentBootstrapper {
    /// Create a bootstrapper over an executor
    pub fn new(executor: RemoteExecutor, config: AgentConfig) -> Self {
        Self { executor, config }
    }

    /// Map `uname -m`; unknown or failed probes fall back to x64
    pub async fn detect_architecture(&self) -> Architecture {
        match self.executor.run("uname -m", self.config.exec_timeout).await {
            Ok(machine) => Architecture::from_machine(&machine).unwrap_or_else(|| {
                tracing::warn!(
                    "Unknown remote architecture '{}', assuming x64",
                    machine.trim()
                );
                Architecture::X64
            }),
            Err(e) => {
                tracing::warn!("Architecture probe failed ({}), assuming x64", e);
                Architecture::X64
            }
        }
    }

    /// Whether the entry point for `version` exists
    ///
    /// Any executor failure reads as "not installed".
    pub async fn is_installed(&self, version: &str) -> bool {
        let script = format!("[ -f \"{}\" ]", self.entry_point(version));
        match self
            .executor
            .run(&wrap(&script), self.config.exec_timeout)
            .await
        {
            Ok(_) => true,
            Err(ExecError::Failure { .. }) => false,
            Err(e) => {
                tracing::debug!("Installed check failed: {}", e);
                false
            }
        }
    }

    /// Download and unpack `version` for `arch`
    ///
    /// Safe to rerun: an existing install is left alone, and a partial one
    /// never becomes visible because unpacking happens in a staging
    /// directory that is renamed into place last.
    pub async fn install(
        &self,
        version: &str,
        arch: Architecture,
        timeout: Duration,
    ) -> Result<(), BootstrapError> {
        validate_version(version)?;
        tracing::info!("Installing agent {} ({})", short_version(version), arch);

        let script = self.install_script(version, arch);
        self.executor
            .run(&wrap(&script), timeout)
            .await
            .map_err(BootstrapError::Install)?;

        tracing::info!("Agent {} installed", short_version(version));
        Ok(())
    }

    /// Start the agent and wait for it to report its port
    pub async fn start(
        &self,
        version: &str,
        token: &ConnectionToken,
        timeout: Duration,
    ) -> Result<AgentInfo, BootstrapError> {
        validate_version(version)?;
        let script = self.start_script(version, token);
        tracing::debug!("Starting agent {} (token {})", short_version(version), token);

        let stream = self.executor.channel().exec(&wrap(&script)).await?;
        let found = watch_output(stream, &PortDiscovery::agent(), timeout).await?;

        let pid = PID_LINE
            .captures(&found.output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());

        tracing::info!(
            "Agent listening on 127.0.0.1:{} (pid {:?}, matched '{}')",
            found.value.port,
            pid,
            found.value.pattern
        );

        Ok(AgentInfo {
            listen_port: found.value.port,
            connection_token: token.clone(),
            pid,
        })
    }

    /// Detect, check, install if absent, then start
    ///
    /// The token comes from `token`, then configuration, then a fresh random
    /// one. `on_start` runs once the install step is done, right before the
    /// agent is launched.
    pub async fn ensure_running<F>(
        &self,
        token: Option<ConnectionToken>,
        on_start: F,
    ) -> Result<AgentInfo, BootstrapError>
    where
        F: FnOnce(),
    {
        let version = self
            .config
            .version
            .clone()
            .ok_or(BootstrapError::NoVersion)?;
        validate_version(&version)?;

        let arch = self.detect_architecture().await;
        if self.is_installed(&version).await {
            tracing::debug!("Agent {} already installed", short_version(&version));
        } else {
            self.install(&version, arch, self.config.install_timeout)
                .await?;
        }

        let token = token
            .or_else(|| self.config.connection_token.clone())
            .unwrap_or_else(ConnectionToken::generate);
        on_start();
        self.start(&version, &token, self.config.start_timeout).await
    }

    /// Archive URL for a version and architecture
    pub fn download_url(&self, version: &str, arch: Architecture) -> String {
        format!(
            "https://{}/commit:{}/server-linux-{}/{}",
            self.config.update_host, version, arch, self.config.quality
        )
    }

    fn version_dir(&self, version: &str) -> String {
        format!("{}/{}", self.config.install_root.trim_end_matches('/'), version)
    }

    fn entry_point(&self, version: &str) -> String {
        format!("{}/{}", self.version_dir(version), self.config.server_binary)
    }

    fn install_script(&self, version: &str, arch: Architecture) -> String {
        format!(
            r#"set -e
DIR="{dir}"
BIN="{bin}"
[ -f "$DIR/$BIN" ] && exit 0
STAGE="$DIR.staging.$$"
ARCHIVE="$STAGE.tar.gz"
trap 'rm -rf "$STAGE" "$ARCHIVE"' EXIT
mkdir -p "$STAGE"
URL={url}
ok=0
i=0
while [ $i -lt {attempts} ]; do
  i=$((i + 1))
  if command -v curl >/dev/null 2>&1; then
    curl -fsSL -o "$ARCHIVE" "$URL" && ok=1 && break
  elif command -v wget >/dev/null 2>&1; then
    wget -q -O "$ARCHIVE" "$URL" && ok=1 && break
  else
    echo "neither curl nor wget is installed" >&2
    exit 2
  fi
  echo "download attempt $i failed" >&2
  sleep {delay}
done
if [ "$ok" != 1 ]; then
  echo "download failed after {attempts} attempts" >&2
  exit 3
fi
tar -xzf "$ARCHIVE" -C "$STAGE" --strip-components=1
rm -f "$ARCHIVE"
chmod +x "$STAGE/$BIN"
[ -f "$DIR/$BIN" ] && exit 0
rm -rf "$DIR"
mv "$STAGE" "$DIR""#,
            dir = self.version_dir(version),
            bin = self.config.server_binary,
            url = sh_quote(&self.download_url(version, arch)),
            attempts = DOWNLOAD_ATTEMPTS,
            delay = DOWNLOAD_RETRY_DELAY_SECS,
        )
    }

    fn start_script(&self, version: &str, token: &ConnectionToken) -> String {
        format!(
            r#"DIR="{dir}"
LOG="$DIR/.roamlink-agent.log"
nohup "$DIR/{bin}" --start-server --host=127.0.0.1 --port=0 --connection-token={token} --accept-server-license-terms --disable-telemetry --without-browser-env-var > "$LOG" 2>&1 < /dev/null &
PID=$!
echo "{marker} $PID"
tail -n +1 -F --pid="$PID" "$LOG" 2>/dev/null || tail -n +1 -f "$LOG"
wait "$PID"
exit $?"#,
            dir = self.version_dir(version),
            bin = self.config.server_binary,
            token = sh_quote(token.expose()),
            marker = PID_MARKER,
        )
    }
}

/// Run a script under `sh` regardless of the login shell
fn wrap(script: &str) -> String {
    format!("sh -c {}", sh_quote(script))
}

fn validate_version(version: &str) -> Result<(), BootstrapError> {
    if VERSION_PATTERN.is_match(version) {
        Ok(())
    } else {
        Err(BootstrapError::InvalidVersion(version.to_string()))
    }
}

/// Commit ids are long; logs show a prefix
fn short_version(version: &str) -> &str {
    version.get(..10).unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ChannelLog, ScriptedChannel, Step};
    use std::sync::Arc;

    const VERSION: &str = "0123456789abcdef";

    fn bootstrapper(channel: ScriptedChannel) -> (EnvironmentBootstrapper, Arc<ChannelLog>) {
        let log = channel.log();
        let mut config = AgentConfig::default();
        config.version = Some(VERSION.to_string());
        let executor = RemoteExecutor::new(Arc::new(channel));
        (EnvironmentBootstrapper::new(executor, config), log)
    }

    #[tokio::test]
    async fn test_detect_architecture() {
        for (machine, expected) in [
            ("x86_64\n", Architecture::X64),
            ("aarch64\n", Architecture::Arm64),
            ("armv7l\n", Architecture::Armhf),
            ("mips64\n", Architecture::X64),
        ] {
            let (b, _) = bootstrapper(
                ScriptedChannel::new().on("uname -m", vec![Step::Stdout(machine), Step::Exit(0)]),
            );
            assert_eq!(b.detect_architecture().await, expected, "{}", machine);
        }
    }

    #[tokio::test]
    async fn test_detect_architecture_survives_failure() {
        let (b, _) = bootstrapper(ScriptedChannel::new().reject("uname"));
        assert_eq!(b.detect_architecture().await, Architecture::X64);
    }

    #[tokio::test]
    async fn test_is_installed_defaults_to_false() {
        let (b, _) = bootstrapper(ScriptedChannel::new().on("[ -f", vec![Step::Exit(0)]));
        assert!(b.is_installed(VERSION).await);

        let (b, _) = bootstrapper(ScriptedChannel::new().on("[ -f", vec![Step::Exit(1)]));
        assert!(!b.is_installed(VERSION).await);

        let (b, _) = bootstrapper(ScriptedChannel::new().reject("[ -f"));
        assert!(!b.is_installed(VERSION).await);

        let (b, _) = bootstrapper(ScriptedChannel::new().on("[ -f", vec![Step::Stdout("x")]));
        assert!(!b.is_installed(VERSION).await);
    }

    #[test]
    fn test_download_url() {
        let (b, _) = bootstrapper(ScriptedChannel::new());
        assert_eq!(
            b.download_url("abc", Architecture::Arm64),
            "https://update.code.visualstudio.com/commit:abc/server-linux-arm64/stable"
        );
    }

    #[test]
    fn test_install_script_shape() {
        let (b, _) = bootstrapper(ScriptedChannel::new());
        let script = b.install_script(VERSION, Architecture::X64);
        assert!(script.contains("curl -fsSL"));
        assert!(script.contains("wget -q"));
        assert!(script.contains("--strip-components=1"));
        assert!(script.contains("sleep 2"));
        assert!(script.contains("-lt 3"));
        assert!(script.contains("chmod +x"));
        assert!(script.contains("mv \"$STAGE\" \"$DIR\""));
        assert!(script.contains("server-linux-x64"));
    }

    #[test]
    fn test_start_script_flags() {
        let (b, _) = bootstrapper(ScriptedChannel::new());
        let token = ConnectionToken::new("tok'en");
        let script = b.start_script(VERSION, &token);
        for flag in [
            "--host=127.0.0.1",
            "--port=0",
            "--accept-server-license-terms",
            "--disable-telemetry",
            "--without-browser-env-var",
        ] {
            assert!(script.contains(flag), "missing {}", flag);
        }
        assert!(script.contains(r"--connection-token='tok'\''en'"));
    }

    #[tokio::test]
    async fn test_install_failure_aborts() {
        let (b, _) = bootstrapper(
            ScriptedChannel::new().on("curl", vec![Step::Stderr("download failed"), Step::Exit(3)]),
        );
        let err = b
            .install(VERSION, Architecture::X64, Duration::from_secs(120))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Install(ExecError::Failure { exit_code: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_version_never_reaches_remote() {
        let (b, log) = bootstrapper(ScriptedChannel::new());
        let err = b
            .install("1; rm -rf /", Architecture::X64, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidVersion(_)));
        assert!(log.commands().is_empty());
    }

    #[tokio::test]
    async fn test_start_reports_port_and_pid() {
        let (b, _) = bootstrapper(ScriptedChannel::new().on(
            "--start-server",
            vec![
                Step::Stdout("roamlink-agent-pid: 4242\n"),
                Step::Stdout("*\n* Visual Studio Code Server\n*\n"),
                Step::Stdout("Extension host agent listening on 39423\n"),
                Step::Hang,
            ],
        ));
        let token = ConnectionToken::new("secret-token");
        let info = b
            .start(VERSION, &token, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(info.listen_port, 39423);
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.connection_token, token);
    }

    #[tokio::test]
    async fn test_start_premature_exit() {
        let (b, _) = bootstrapper(ScriptedChannel::new().on(
            "--start-server",
            vec![Step::Stdout("error: unknown option\n"), Step::Exit(9)],
        ));
        let err = b
            .start(VERSION, &ConnectionToken::generate(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::PrematureExit { code: Some(9), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout() {
        let (b, _) = bootstrapper(
            ScriptedChannel::new().on("--start-server", vec![Step::Hang]),
        );
        let err = b
            .start(VERSION, &ConnectionToken::generate(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::StartTimeout(_)));
    }

    #[tokio::test]
    async fn test_ensure_running_skips_install_when_present() {
        let (b, log) = bootstrapper(
            ScriptedChannel::new()
                .on("uname -m", vec![Step::Stdout("x86_64\n"), Step::Exit(0)])
                .on("[ -f", vec![Step::Exit(0)])
                .on(
                    "--start-server",
                    vec![
                        Step::Stdout("Server bound to 127.0.0.1:40001\n"),
                        Step::Hang,
                    ],
                ),
        );
        let mut started = 0;
        let info = b.ensure_running(None, || started += 1).await.unwrap();
        assert_eq!(info.listen_port, 40001);
        assert_eq!(started, 1);
        assert_eq!(log.count("curl"), 0);
    }

    #[tokio::test]
    async fn test_ensure_running_installs_when_absent() {
        let (b, log) = bootstrapper(
            ScriptedChannel::new()
                .on("uname -m", vec![Step::Stdout("aarch64\n"), Step::Exit(0)])
                .on("--start-server", vec![
                    Step::Stdout("Extension host agent listening on 40002\n"),
                    Step::Hang,
                ])
                .on("curl", vec![Step::Exit(0)])
                .on("[ -f", vec![Step::Exit(1)]),
        );
        let info = b
            .ensure_running(Some(ConnectionToken::new("given")), || {})
            .await
            .unwrap();
        assert_eq!(info.connection_token.expose(), "given");
        assert_eq!(log.count("server-linux-arm64"), 1);
    }

    #[tokio::test]
    async fn test_ensure_running_without_version() {
        let channel = ScriptedChannel::new();
        let b = EnvironmentBootstrapper::new(
            RemoteExecutor::new(Arc::new(channel)),
            AgentConfig::default(),
        );
        assert!(matches!(
            b.ensure_running(None, || {}).await,
            Err(BootstrapError::NoVersion)
        ));
    }

    #[tokio::test]
    async fn test_ensure_running_install_failure_skips_start() {
        let (b, log) = bootstrapper(
            ScriptedChannel::new()
                .on("uname -m", vec![Step::Stdout("x86_64\n"), Step::Exit(0)])
                .on("curl", vec![Step::Stderr("download failed"), Step::Exit(3)])
                .on("[ -f", vec![Step::Exit(1)]),
        );
        let mut started = false;
        let err = b.ensure_running(None, || started = true).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Install(_)));
        assert!(!started);
        assert_eq!(log.count("--start-server"), 0);
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }
}
