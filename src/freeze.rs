//! Instant-clone freeze scripts
//!
//! A freeze script is uploaded into the guest and started there; it asks
//! the guest tools to freeze the VM for instant cloning and then restarts
//! or logs off the guest.

use crate::remote::GuestProgramSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestFamily {
    Windows,
    LinuxBsd,
}

impl GuestFamily {
    pub const ALL: [GuestFamily; 2] = [GuestFamily::Windows, GuestFamily::LinuxBsd];

    pub fn as_str(&self) -> &'static str {
        match self {
            GuestFamily::Windows => "Windows",
            GuestFamily::LinuxBsd => "Linux/BSD",
        }
    }
}

/// Catalog entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FreezeScriptKind {
    WindowsRestart,
    WindowsFast,
    LinuxBsdRestart,
}

impl FreezeScriptKind {
    pub const ALL: [FreezeScriptKind; 3] = [
        FreezeScriptKind::WindowsRestart,
        FreezeScriptKind::WindowsFast,
        FreezeScriptKind::LinuxBsdRestart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FreezeScriptKind::WindowsRestart => "windows-restart",
            FreezeScriptKind::WindowsFast => "windows-fast",
            FreezeScriptKind::LinuxBsdRestart => "linux-bsd-restart",
        }
    }
}

impl fmt::Display for FreezeScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FreezeScriptKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FreezeScriptKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .or_else(|| FreezeCatalog::by_label(s).map(|script| script.kind))
            .ok_or_else(|| format!("unknown freeze script '{}'", s))
    }
}

/// Immutable (file name, body) pair run inside the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeScript {
    pub kind: FreezeScriptKind,
    pub label: &'static str,
    pub family: GuestFamily,
    pub file_name: &'static str,
    pub content: &'static str,
}

const WINDOWS_TEMP_DIR: &str = r"C:\Windows\Temp";
const UNIX_TEMP_DIR: &str = "/tmp";

static CATALOG: [FreezeScript; 3] = [
    FreezeScript {
        kind: FreezeScriptKind::WindowsRestart,
        label: "Windows Restart Script",
        family: GuestFamily::Windows,
        file_name: "freeze.bat",
        content: r#""C:\Program Files\VMware\VMware Tools\rpctool.exe" "instantclone.freeze" && shutdown /r /t 001"#,
    },
    FreezeScript {
        kind: FreezeScriptKind::WindowsFast,
        label: "Windows Fast Script",
        family: GuestFamily::Windows,
        file_name: "fast-freeze.ps1",
        content: r#"cd "C:\Program Files\VMware\VMware Tools"; .\rpctool.exe "instantclone.freeze"; ping 127.0.0.1; Get-NetAdapter | Enable-NetAdapter; shutdown /l > output"#,
    },
    FreezeScript {
        kind: FreezeScriptKind::LinuxBsdRestart,
        label: "Linux/BSD Restart Script",
        family: GuestFamily::LinuxBsd,
        file_name: "freeze.sh",
        content: r#"vmware-rpctool "instantclone.freeze" && init 6"#,
    },
];

impl FreezeScript {
    /// Where the script is uploaded inside the guest
    pub fn guest_path(&self) -> String {
        match self.family {
            GuestFamily::Windows => format!(r"{}\{}", WINDOWS_TEMP_DIR, self.file_name),
            GuestFamily::LinuxBsd => format!("{}/{}", UNIX_TEMP_DIR, self.file_name),
        }
    }

    /// Program invocation that runs the uploaded script
    pub fn launch_spec(&self) -> GuestProgramSpec {
        let path = self.guest_path();
        match (self.family, self.file_name.ends_with(".ps1")) {
            (GuestFamily::Windows, true) => GuestProgramSpec {
                program_path: r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe".to_string(),
                arguments: format!("-ExecutionPolicy Bypass -File \"{}\"", path),
                working_directory: Some(WINDOWS_TEMP_DIR.to_string()),
            },
            (GuestFamily::Windows, false) => GuestProgramSpec {
                program_path: r"C:\Windows\System32\cmd.exe".to_string(),
                arguments: format!("/c \"{}\"", path),
                working_directory: Some(WINDOWS_TEMP_DIR.to_string()),
            },
            (GuestFamily::LinuxBsd, _) => GuestProgramSpec {
                program_path: "/bin/sh".to_string(),
                arguments: path,
                working_directory: Some(UNIX_TEMP_DIR.to_string()),
            },
        }
    }
}

pub struct FreezeCatalog;

impl FreezeCatalog {
    pub fn all() -> &'static [FreezeScript] {
        &CATALOG
    }

    pub fn get(kind: FreezeScriptKind) -> &'static FreezeScript {
        match kind {
            FreezeScriptKind::WindowsRestart => &CATALOG[0],
            FreezeScriptKind::WindowsFast => &CATALOG[1],
            FreezeScriptKind::LinuxBsdRestart => &CATALOG[2],
        }
    }

    /// Lookup by the display label shown in pickers
    pub fn by_label(label: &str) -> Option<&'static FreezeScript> {
        Self::all().iter().find(|script| script.label == label)
    }

    pub fn for_family(family: GuestFamily) -> Vec<&'static FreezeScript> {
        Self::all()
            .iter()
            .filter(|script| script.family == family)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_entries_match_their_kind() {
        for kind in FreezeScriptKind::ALL {
            assert_eq!(FreezeCatalog::get(kind).kind, kind);
        }
        assert_eq!(FreezeCatalog::all().len(), 3);
        assert_eq!(FreezeCatalog::for_family(GuestFamily::Windows).len(), 2);
        assert_eq!(FreezeCatalog::for_family(GuestFamily::LinuxBsd).len(), 1);
    }

    #[test]
    fn every_script_requests_the_freeze() {
        for script in FreezeCatalog::all() {
            assert!(script.content.contains("instantclone.freeze"), "{}", script.label);
        }
    }

    #[test]
    fn label_lookup() {
        let script = FreezeCatalog::by_label("Linux/BSD Restart Script").unwrap();
        assert_eq!(script.file_name, "freeze.sh");
        assert!(FreezeCatalog::by_label("Solaris").is_none());
    }

    #[test]
    fn launch_specs_per_family() {
        let linux = FreezeCatalog::get(FreezeScriptKind::LinuxBsdRestart).launch_spec();
        assert_eq!(linux.program_path, "/bin/sh");
        assert_eq!(linux.arguments, "/tmp/freeze.sh");

        let fast = FreezeCatalog::get(FreezeScriptKind::WindowsFast).launch_spec();
        assert!(fast.program_path.ends_with("powershell.exe"));
        assert!(fast.arguments.contains(r"C:\Windows\Temp\fast-freeze.ps1"));

        let restart = FreezeCatalog::get(FreezeScriptKind::WindowsRestart).launch_spec();
        assert!(restart.program_path.ends_with("cmd.exe"));
    }

    #[test]
    fn kinds_parse_from_their_labels() {
        assert_eq!(
            "Linux/BSD Restart Script".parse::<FreezeScriptKind>(),
            Ok(FreezeScriptKind::LinuxBsdRestart)
        );
    }

    #[test]
    fn kinds_parse_from_their_names() {
        assert_eq!(
            "windows-fast".parse::<FreezeScriptKind>(),
            Ok(FreezeScriptKind::WindowsFast)
        );
        assert!("beos".parse::<FreezeScriptKind>().is_err());
    }
}
