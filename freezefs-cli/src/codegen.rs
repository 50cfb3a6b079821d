use std::fmt::Write as _;

use freezefs_core::deploy::Overwrite;
use freezefs_core::OnImport;

/// Settings baked into the generated module.
pub struct ModuleSettings<'a> {
    pub target: &'a str,
    pub on_import: OnImport,
    pub overwrite: Overwrite,
    pub silent: bool,
    pub version: u32,
    pub date_frozen: &'a str,
    pub files: usize,
    pub folders: usize,
}

const BYTES_PER_LINE: usize = 16;

fn variant(on_import: OnImport) -> &'static str {
    match on_import {
        OnImport::Mount => "OnImport::Mount",
        OnImport::Deploy => "OnImport::Deploy",
        OnImport::NoAction => "OnImport::NoAction",
    }
}

fn overwrite_variant(o: Overwrite) -> &'static str {
    match o {
        Overwrite::Never => "Overwrite::Never",
        Overwrite::Always => "Overwrite::Always",
    }
}

/// Render a Rust source file that embeds `image` and declares a `FROZEN`
/// module static for it.
pub fn render_module(image: &[u8], settings: &ModuleSettings<'_>) -> String {
    let mut out = String::with_capacity(image.len() * 5 + 1024);
    let _ = writeln!(out, "// Generated by freezefs {}. Do not edit.", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(
        out,
        "// image format v{}, frozen {}, {} files, {} folders",
        settings.version, settings.date_frozen, settings.files, settings.folders
    );
    out.push('\n');
    out.push_str("use freezefs_core::deploy::Overwrite;\n");
    out.push_str("use freezefs_core::{FrozenModule, OnImport, Vfs};\n\n");
    let _ = writeln!(out, "pub const TARGET: &str = {:?};", settings.target);
    out.push('\n');
    let _ = writeln!(out, "pub static IMAGE: &[u8] = &[");
    for line in image.chunks(BYTES_PER_LINE) {
        out.push_str("    ");
        for (i, b) in line.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "0x{:02x},", b);
        }
        out.push('\n');
    }
    out.push_str("];\n\n");
    let _ = writeln!(
        out,
        "pub static FROZEN: FrozenModule = FrozenModule::new(IMAGE, TARGET, {}, {}, {});",
        variant(settings.on_import),
        overwrite_variant(settings.overwrite),
        settings.silent
    );
    out.push('\n');
    out.push_str("/// Run the on-import action configured at build time (once per process).\n");
    out.push_str("pub fn on_load(vfs: &Vfs) -> freezefs_core::FsResult<()> {\n");
    out.push_str("    FROZEN.on_load(vfs)\n");
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_bytes_per_line() {
        let settings = ModuleSettings {
            target: "/data",
            on_import: OnImport::Deploy,
            overwrite: Overwrite::Always,
            silent: true,
            version: 1,
            date_frozen: "2026/01/02 03:04:05",
            files: 1,
            folders: 0,
        };
        let src = render_module(&[0xAB; 20], &settings);
        assert!(src.contains("pub const TARGET: &str = \"/data\";"));
        assert!(src.contains("OnImport::Deploy, Overwrite::Always, true"));
        let rows: Vec<&str> = src.lines().filter(|l| l.starts_with("    0x")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].matches("0xab,").count(), 16);
        assert_eq!(rows[1].matches("0xab,").count(), 4);
    }

    mod rendered {
        include!("../tests/fixtures/no_action_module.rs");
    }

    #[test]
    fn rendered_module_compiles_and_loads() {
        let settings = ModuleSettings {
            target: "/demo",
            on_import: OnImport::NoAction,
            overwrite: Overwrite::Never,
            silent: true,
            version: 1,
            date_frozen: "2026/01/02 03:04:05",
            files: 1,
            folders: 0,
        };
        let image: Vec<u8> = (0u8..18).collect();
        assert_eq!(render_module(&image, &settings), include_str!("../tests/fixtures/no_action_module.rs"));

        assert_eq!(rendered::IMAGE, &image[..]);
        assert_eq!(rendered::FROZEN.target(), "/demo");
        assert_eq!(rendered::FROZEN.on_import(), OnImport::NoAction);
        let vfs = freezefs_core::Vfs::new();
        rendered::on_load(&vfs).unwrap();
        rendered::on_load(&vfs).unwrap();
        assert!(vfs.mount_points().is_empty());
    }
}
