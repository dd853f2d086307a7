//! Applies an image file as the desktop background.

use std::path::{Path, PathBuf};

use crate::error::Result;

pub trait WallpaperSetter {
    fn apply(&self, image: &Path) -> Result<()>;
}

/// Platform wallpaper backend. `cache_dir` holds converted copies for desktops
/// that cannot show transparency.
pub struct DesktopWallpaper {
    cache_dir: PathBuf,
}

impl DesktopWallpaper {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }
}

impl WallpaperSetter for DesktopWallpaper {
    fn apply(&self, image: &Path) -> Result<()> {
        let image = image.canonicalize()?;
        platform::apply(&image, &self.cache_dir)
    }
}

#[cfg(not(windows))]
mod platform {
    use std::{
        env, fs,
        fs::File,
        io::{BufWriter, Write},
        path::{Path, PathBuf},
        process::{Command, Stdio},
    };

    use image::{codecs::jpeg::JpegEncoder, ColorType, RgbImage};

    use crate::{
        debug,
        error::{Error, Result},
        utility::{command_exists, random_wallpaper_name},
        warn,
    };

    const GNOME_SCHEMA: &str = "org.gnome.desktop.background";
    const FLATTENED_PREFIX: &str = "wallpaper-gsettings";

    fn run(program: &str, args: &[&str]) -> bool {
        match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
        {
            Ok(out) if out.status.success() => true,
            Ok(out) => {
                debug!(
                    "{program} exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                false
            }
            Err(e) => {
                debug!("Could not run {program}: {e}");
                false
            }
        }
    }

    fn output(program: &str, args: &[&str]) -> String {
        Command::new(program)
            .args(args)
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
            .unwrap_or_default()
    }

    /// GNOME renders alpha badly; give it an opaque JPEG copy instead.
    fn flatten_for_gnome(image: &Path, cache_dir: &Path) -> Result<Option<PathBuf>> {
        let img = image::open(image)?;
        if img.color() == ColorType::Rgb8 {
            return Ok(None);
        }

        let rgba = img.to_rgba8();
        let flat = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let [r, g, b, a] = rgba.get_pixel(x, y).0;
            let over_black = |c: u8| ((u16::from(c) * u16::from(a)) / 255) as u8;
            image::Rgb([over_black(r), over_black(g), over_black(b)])
        });

        fs::create_dir_all(cache_dir)?;
        remove_old_flattened(cache_dir);
        let out = cache_dir.join(random_wallpaper_name(FLATTENED_PREFIX, "jpg"));
        let mut writer = BufWriter::new(File::create(&out)?);
        JpegEncoder::new_with_quality(&mut writer, 95).encode_image(&flat)?;
        writer.flush()?;
        Ok(Some(out))
    }

    fn remove_old_flattened(cache_dir: &Path) {
        let Ok(entries) = fs::read_dir(cache_dir) else {
            return;
        };
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FLATTENED_PREFIX));
            if stale {
                // an old copy is harmless if it lingers
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn try_gnome(image: &Path, cache_dir: &Path) -> bool {
        if !command_exists("gsettings") || !output("gsettings", &["list-schemas"]).contains(GNOME_SCHEMA) {
            return false;
        }
        let shown = match flatten_for_gnome(image, cache_dir) {
            Ok(Some(flat)) => flat,
            Ok(None) => image.to_path_buf(),
            Err(e) => {
                warn!("Could not flatten {} for GNOME: {e}", image.display());
                image.to_path_buf()
            }
        };
        let uri = format!("file://{}", shown.display());
        if !run("gsettings", &["set", GNOME_SCHEMA, "picture-uri", &uri]) {
            return false;
        }
        run("gsettings", &["set", GNOME_SCHEMA, "picture-uri-dark", &uri]);
        run("gsettings", &["set", GNOME_SCHEMA, "picture-options", "zoom"]);
        true
    }

    fn try_commands(image: &str) -> bool {
        if command_exists("swaymsg")
            && env::var_os("SWAYSOCK").is_some()
            && run("swaymsg", &["output", "*", "bg", image, "fill"])
        {
            return true;
        }
        if command_exists("feh") && run("feh", &["--bg-fill", image]) {
            return true;
        }
        if command_exists("xfconf-query") {
            let props = [
                "/backdrop/screen0/monitor0/image-path",
                "/backdrop/screen0/monitor0/workspace0/last-image",
            ];
            let mut any = false;
            for prop in props {
                any |= run("xfconf-query", &["-c", "xfce4-desktop", "-p", prop, "-s", image]);
            }
            if any {
                return true;
            }
        }
        command_exists("nitrogen") && run("nitrogen", &["--set-zoom-fill", image, "--save"])
    }

    pub fn apply(image: &Path, cache_dir: &Path) -> Result<()> {
        if try_gnome(image, cache_dir) {
            return Ok(());
        }
        let image_str = image.to_string_lossy();
        if try_commands(&image_str) {
            return Ok(());
        }
        Err(Error::Apply(format!(
            "no supported method succeeded for {image_str}"
        )))
    }

}

#[cfg(windows)]
mod platform {
    use std::{ffi::c_void, path::Path};

    use windows::Win32::UI::WindowsAndMessaging::{
        SystemParametersInfoW, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER,
    };

    use crate::{
        error::{Error, Result},
        utility::to_wstring,
    };

    pub fn apply(image: &Path, _cache_dir: &Path) -> Result<()> {
        let path = image.to_string_lossy();
        let path = path.strip_prefix(r"\\?\").unwrap_or(&path);
        let mut wide = to_wstring(path);
        unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                Some(wide.as_mut_ptr() as *mut c_void),
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        }
        .map_err(|e| Error::Apply(e.to_string()))
    }
}
