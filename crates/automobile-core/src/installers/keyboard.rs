//! Virtual-keyboard installer (§4.9 Module I, Android only).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::installers::{download_and_verify, Installer, StatusCache};
use crate::runner::{CommandRunner, CommandSpec};

const IME_ID: &str = "com.automobile.keyboard/.AutoMobileInputMethodService";
const APK_URL: &str = "https://example.invalid/automobile-keyboard.apk";
const EXPECTED_SHA256: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Installs, enables, and activates the automation IME, restoring whatever
/// IME was active beforehand on teardown (§4.9).
pub struct KeyboardInstaller {
    device_id: String,
    runner: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    status: StatusCache,
    previous_ime: std::sync::Mutex<Option<String>>,
}

impl KeyboardInstaller {
    pub fn new(device_id: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            device_id: device_id.into(),
            runner,
            client: reqwest::Client::new(),
            status: StatusCache::default(),
            previous_ime: std::sync::Mutex::new(None),
        }
    }

    async fn shell(&self, args: Vec<String>) -> Result<String, CoreError> {
        let mut full = vec!["-s".to_string(), self.device_id.clone(), "shell".to_string()];
        full.extend(args);
        let output = self.runner.execute(CommandSpec::new("adb", full)).await?;
        Ok(output.stdout_string())
    }

    /// Restores the IME that was active before [`Installer::activate`] was
    /// called, if one was captured.
    pub async fn restore_previous_ime(&self) -> Result<(), CoreError> {
        let previous = self.previous_ime.lock().unwrap().clone();
        if let Some(id) = previous {
            self.shell(vec!["ime".into(), "set".into(), id]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Installer for KeyboardInstaller {
    fn status_cache(&self) -> &StatusCache {
        &self.status
    }

    async fn check_installed(&self) -> Result<bool, CoreError> {
        let output = self
            .shell(vec!["ime".into(), "list".into(), "-s".into()])
            .await?;
        Ok(output.lines().any(|line| line.trim() == IME_ID))
    }

    async fn install(&self) -> Result<(), CoreError> {
        let apk_path = std::path::PathBuf::from("/tmp/automobile-keyboard/automobile-keyboard.apk");
        download_and_verify(&self.client, APK_URL, &apk_path, EXPECTED_SHA256).await?;
        let output = self
            .runner
            .execute(CommandSpec::new(
                "adb",
                vec![
                    "-s".into(),
                    self.device_id.clone(),
                    "install".into(),
                    "-r".into(),
                    apk_path.to_string_lossy().into_owned(),
                ],
            ))
            .await?;
        if !output.stdout_string().contains("Success") {
            return Err(CoreError::ActionableError(
                "adb install did not report Success for the automation keyboard".into(),
            ));
        }
        Ok(())
    }

    async fn check_enabled(&self) -> Result<bool, CoreError> {
        let output = self
            .shell(vec!["ime".into(), "list".into(), "-a".into()])
            .await?;
        Ok(output.contains(IME_ID))
    }

    async fn enable(&self) -> Result<(), CoreError> {
        self.shell(vec!["ime".into(), "enable".into(), IME_ID.into()])
            .await?;
        Ok(())
    }

    async fn check_active(&self) -> Result<bool, CoreError> {
        let current = self
            .shell(vec![
                "settings".into(),
                "get".into(),
                "secure".into(),
                "default_input_method".into(),
            ])
            .await?;
        Ok(current.trim() == IME_ID)
    }

    async fn activate(&self) -> Result<(), CoreError> {
        let current = self
            .shell(vec![
                "settings".into(),
                "get".into(),
                "secure".into(),
                "default_input_method".into(),
            ])
            .await?;
        let current = current.trim();
        if current != IME_ID && current != "null" {
            *self.previous_ime.lock().unwrap() = Some(current.to_string());
        }
        self.shell(vec!["ime".into(), "set".into(), IME_ID.into()])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, CommandSpec};
    use std::sync::Mutex as StdMutex;

    fn exit_success() -> std::process::ExitStatus {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            std::process::ExitStatus::from_raw(0)
        }
        #[cfg(not(unix))]
        {
            std::process::Command::new("cmd").arg("/C").arg("exit 0").status().unwrap()
        }
    }

    fn ok_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: exit_success(),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    /// Replays queued stdout strings for successive `shell` calls in order.
    struct ScriptedRunner {
        responses: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn execute(&self, _spec: CommandSpec) -> Result<CommandOutput, CoreError> {
            let next = self.responses.lock().unwrap().remove(0);
            Ok(ok_output(&next))
        }
    }

    fn installer(responses: Vec<&str>) -> KeyboardInstaller {
        let runner = Arc::new(ScriptedRunner {
            responses: StdMutex::new(responses.into_iter().map(String::from).collect()),
        });
        KeyboardInstaller::new("emulator-5554", runner)
    }

    #[tokio::test]
    async fn check_installed_matches_exact_ime_id_line() {
        let inst = installer(vec![&format!("com.other.ime/.Service\n{IME_ID}\n")]);
        assert!(inst.check_installed().await.unwrap());
    }

    #[tokio::test]
    async fn check_installed_false_when_absent() {
        let inst = installer(vec!["com.other.ime/.Service\n"]);
        assert!(!inst.check_installed().await.unwrap());
    }

    #[tokio::test]
    async fn check_active_trims_and_compares() {
        let inst = installer(vec![&format!("{IME_ID}\n")]);
        assert!(inst.check_active().await.unwrap());
    }

    #[tokio::test]
    async fn activate_captures_previous_ime_when_different() {
        let inst = installer(vec!["com.other.ime/.Service\n", "ignored ime set output"]);
        inst.activate().await.unwrap();
        assert_eq!(
            inst.previous_ime.lock().unwrap().as_deref(),
            Some("com.other.ime/.Service")
        );
    }

    #[tokio::test]
    async fn activate_does_not_capture_when_already_active() {
        let inst = installer(vec![&format!("{IME_ID}\n"), "ignored ime set output"]);
        inst.activate().await.unwrap();
        assert!(inst.previous_ime.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn activate_does_not_capture_null_baseline() {
        let inst = installer(vec!["null\n", "ignored ime set output"]);
        inst.activate().await.unwrap();
        assert!(inst.previous_ime.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_previous_ime_is_noop_when_nothing_captured() {
        let inst = installer(vec![]);
        inst.restore_previous_ime().await.unwrap();
    }

    #[tokio::test]
    async fn restore_previous_ime_issues_ime_set_when_captured() {
        let inst = installer(vec!["restored"]);
        *inst.previous_ime.lock().unwrap() = Some("com.other.ime/.Service".into());
        inst.restore_previous_ime().await.unwrap();
    }
}
