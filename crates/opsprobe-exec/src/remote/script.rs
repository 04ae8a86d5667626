use std::collections::BTreeMap;

use opsprobe_core::CallContext;
use opsprobe_core::Vm;
use uuid::Uuid;

use super::RemoteExecutor;
use super::wrap;
use crate::error::Result;
use crate::runner::CommandOutput;

impl RemoteExecutor {
    /// Run `script` on `vm` with `flags` as arguments and `env` set.
    ///
    /// Scripts can be far longer than a command line allows, so the body
    /// never appears in the ssh invocation: Windows scripts are uploaded as
    /// `C:\<uuid>.ps1`, Linux scripts are streamed on stdin into
    /// `<uuid>.sh` in the login directory.
    pub async fn run_script_remotely(
        &self,
        ctx: &CallContext,
        vm: &Vm,
        script: &str,
        flags: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput> {
        let id = Uuid::new_v4();
        if vm.is_windows() {
            let script_path = format!(r"C:\{id}.ps1");
            self.upload_content(ctx, vm, script.as_bytes(), &script_path).await?;
            let command = wrap::windows_script_command(&script_path, flags, env);
            return self.run_remotely(ctx, vm, &command).await;
        }

        let script_name = format!("{id}.sh");
        let command = wrap::linux_script_command(&script_name, flags, env);
        self.run_remotely_with_stdin(ctx, vm, &command, script.as_bytes()).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_linux_script_streams_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let remote = executor(fake_ssh(dir.path(), "true"), Arc::default());
        let mut env = BTreeMap::new();
        env.insert("MODE".to_string(), "test".to_string());
        let script = "#!/bin/bash\necho hi\n";

        remote
            .run_script_remotely(&CallContext::background(), &vm("debian-cloud:debian-12"), script, &["-v".into()], &env)
            .await
            .unwrap();

        let commands = recorded_commands(dir.path());
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("cat - > "), "{}", commands[0]);
        assert!(commands[0].contains(".sh && sudo MODE='test' bash -x "), "{}", commands[0]);
        assert!(commands[0].ends_with(".sh '-v'"), "{}", commands[0]);
        assert_eq!(std::fs::read_to_string(dir.path().join("stdin.log")).unwrap(), script);
    }

    #[tokio::test]
    async fn test_windows_script_never_inlines_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let remote = executor(fake_ssh(dir.path(), "true"), Arc::clone(&store));
        let script = "Write-Output 'x'\n".repeat(600);
        assert!(script.len() >= 10_000);

        remote
            .run_script_remotely(
                &CallContext::background(),
                &vm("windows-cloud:windows-2022"),
                &script,
                &[],
                &BTreeMap::new(),
            )
            .await
            .unwrap();

        let objects = store.objects.lock();
        assert_eq!(objects.len(), 1);
        let (object, body) = objects.iter().next().unwrap();
        assert!(object.starts_with(r"transfers/test-vm/C:\") && object.ends_with(".ps1"), "{object}");
        assert_eq!(body.as_slice(), script.as_bytes());
        assert_eq!(store.deleted.lock().len(), 1);

        let commands = recorded_commands(dir.path());
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.len() < 2_000));
    }
}
