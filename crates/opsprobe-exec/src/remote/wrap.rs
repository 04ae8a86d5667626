//! Pure builders for the command strings sent to guests.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Wrap a PowerShell command so it survives the remote shell unchanged.
///
/// PowerShell's `-EncodedCommand` takes base64 of the UTF-16LE bytes.
pub fn encode_powershell(command: &str) -> String {
    let utf16le: Vec<u8> = command.encode_utf16().flat_map(u16::to_le_bytes).collect();
    format!("powershell -NonInteractive -EncodedCommand \"{}\"", STANDARD.encode(utf16le))
}

/// Single-quote for POSIX shells.
pub fn quote_posix(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-quote for PowerShell.
pub fn quote_powershell(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Command that runs an uploaded PowerShell script with `env` set.
pub fn windows_script_command(script_path: &str, flags: &[String], env: &BTreeMap<String, String>) -> String {
    let mut command = String::new();
    for (key, value) in env {
        command.push_str(&format!("$env:{key}={}\n", quote_powershell(value)));
    }
    command.push_str("powershell -File ");
    command.push_str(script_path);
    for flag in flags {
        command.push(' ');
        command.push_str(&quote_powershell(flag));
    }
    command
}

/// Command that saves a script streamed on stdin to `script_name` and runs
/// it under `sudo` with `env` set.
pub fn linux_script_command(script_name: &str, flags: &[String], env: &BTreeMap<String, String>) -> String {
    let mut command = format!("cat - > {script_name} && sudo ");
    for (key, value) in env {
        command.push_str(&format!("{key}={} ", quote_posix(value)));
    }
    command.push_str("bash -x ");
    command.push_str(script_name);
    for flag in flags {
        command.push(' ');
        command.push_str(&quote_posix(flag));
    }
    command
}

/// PowerShell that pulls `gs://bucket/object` to `path` on Windows.
pub fn windows_pull_command(bucket: &str, object: &str, path: &str) -> String {
    format!(
        "New-Item -Path \"{path}\" -ItemType File -Force ;Read-GcsObject -Force -Bucket \"{bucket}\" -ObjectName \"{object}\" -OutFile \"{path}\""
    )
}

/// Shell that pulls `gs://bucket/object` to `path` on Linux.
pub fn linux_pull_command(bucket: &str, object: &str, path: &str) -> String {
    format!("sudo gsutil cp {} {}", quote_posix(&format!("gs://{bucket}/{object}")), quote_posix(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_powershell(wrapped: &str) -> String {
        let encoded = wrapped
            .strip_prefix("powershell -NonInteractive -EncodedCommand \"")
            .and_then(|s| s.strip_suffix('"'))
            .unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        let units: Vec<u16> = bytes.chunks(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn test_encode_powershell_is_utf16le_base64() {
        assert_eq!(encode_powershell("'foo'"), "powershell -NonInteractive -EncodedCommand \"JwBmAG8AbwAnAA==\"");
        let command = "Get-Content -Path 'C:\\ünïcode.txt' -Raw";
        assert_eq!(decode_powershell(&encode_powershell(command)), command);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_posix("it's"), r"'it'\''s'");
        assert_eq!(quote_powershell("it's"), "'it''s'");
    }

    #[test]
    fn test_linux_script_command() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        env.insert("B".to_string(), "two words".to_string());
        let command = linux_script_command("abc.sh", &["--flag".to_string(), "x y".to_string()], &env);
        assert_eq!(command, "cat - > abc.sh && sudo A='1' B='two words' bash -x abc.sh '--flag' 'x y'");
    }

    #[test]
    fn test_windows_script_command() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        let command = windows_script_command(r"C:\abc.ps1", &["-Verbose".to_string()], &env);
        assert_eq!(command, "$env:A='1'\npowershell -File C:\\abc.ps1 '-Verbose'");
    }

    #[test]
    fn test_pull_commands() {
        assert_eq!(
            linux_pull_command("bucket", "vm/etc/a.yaml", "/etc/a.yaml"),
            "sudo gsutil cp 'gs://bucket/vm/etc/a.yaml' '/etc/a.yaml'"
        );
        assert_eq!(
            windows_pull_command("bucket", "vm/C:\\a.ps1", "C:\\a.ps1"),
            "New-Item -Path \"C:\\a.ps1\" -ItemType File -Force ;Read-GcsObject -Force -Bucket \"bucket\" -ObjectName \"vm/C:\\a.ps1\" -OutFile \"C:\\a.ps1\""
        );
    }
}
