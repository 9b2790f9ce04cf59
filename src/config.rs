use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::assets::{FrameAddressing, FrameLayout};
use crate::framegen::{CreateFlags, DispatchMode};
use crate::graphics::{WindowMode, WindowSettings};

/// Vertical field of view of the captured sequence, in degrees.
pub const CAMERA_FOV_DEGREES: f32 = 45.0;
pub const CAMERA_NEAR: f32 = 0.1;
pub const CAMERA_FAR: f32 = 512.0;
/// Frame time reported to the engine, in milliseconds (30 fps capture).
pub const FRAME_TIME_DELTA_MS: f32 = 33.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DispatchModeArg {
    /// Record the generate dispatch directly.
    Manual,
    /// Let the engine call back for the interpolated frame at present time.
    Callback,
}

impl From<DispatchModeArg> for DispatchMode {
    fn from(arg: DispatchModeArg) -> Self {
        match arg {
            DispatchModeArg::Manual => DispatchMode::Manual,
            DispatchModeArg::Callback => DispatchMode::Callback,
        }
    }
}

/// Plays back a captured frame sequence through frame generation.
#[derive(Parser, Debug)]
#[command(name = "framegen-demo", version)]
pub struct Args {
    /// Directory holding the color, depth, motion vector and matrix files.
    #[arg(long, default_value = "frames")]
    pub frames_dir: PathBuf,

    /// Read the `*_decode` directories with four-digit file numbers.
    #[arg(long)]
    pub compressed: bool,

    /// Number of asset frames in the sequence.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub frame_count: u32,

    /// Rendered frames per asset frame.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub frames_per_asset: u32,

    /// Initial window width.
    #[arg(long, default_value_t = 1280, value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Initial window height.
    #[arg(long, default_value_t = 720, value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Borderless fullscreen on the primary monitor.
    #[arg(long)]
    pub fullscreen: bool,

    /// Start with frame generation turned off (toggle with F).
    #[arg(long)]
    pub no_frame_generation: bool,

    #[arg(long, value_enum, default_value_t = DispatchModeArg::Manual)]
    pub dispatch_mode: DispatchModeArg,

    /// Present only the generated frames.
    #[arg(long)]
    pub only_present_generated: bool,

    /// Ask the engine for an HDR context.
    #[arg(long)]
    pub hdr: bool,

    /// Depth is stored with 1.0 at the near plane and 0.0 at infinity.
    #[arg(long)]
    pub depth_inverted: bool,

    /// Submit the generate work separately from the prepare work.
    #[arg(long)]
    pub async_compute: bool,

    /// Save a PPM screenshot of the first presented frame.
    #[arg(long)]
    pub screenshot: Option<PathBuf>,

    /// Enable the Vulkan validation layers.
    #[arg(long)]
    pub validation: bool,

    #[arg(long, default_value = "info")]
    pub log_level: log::LevelFilter,
}

/// Frame generation switches that hold for the whole run, unless toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOptions {
    pub enabled: bool,
    pub dispatch_mode: DispatchMode,
    pub only_present_generated: bool,
}

/// Resolved, immutable run configuration.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub layout: FrameLayout,
    pub frame_count: u32,
    pub frames_per_asset: u32,
    pub window: WindowSettings,
    pub generation: GenerationOptions,
    pub create_flags: CreateFlags,
    pub async_compute: bool,
    pub screenshot: Option<PathBuf>,
    pub validation: bool,
}

impl From<Args> for DemoConfig {
    fn from(args: Args) -> Self {
        let addressing = if args.compressed {
            FrameAddressing::Compressed
        } else {
            FrameAddressing::Raw
        };

        Self {
            layout: FrameLayout::new(args.frames_dir, addressing),
            frame_count: args.frame_count,
            frames_per_asset: args.frames_per_asset,
            window: WindowSettings {
                width: args.width,
                height: args.height,
                mode: if args.fullscreen {
                    WindowMode::BorderlessFullscreen
                } else {
                    WindowMode::Windowed
                },
                ..Default::default()
            },
            generation: GenerationOptions {
                enabled: !args.no_frame_generation,
                dispatch_mode: args.dispatch_mode.into(),
                only_present_generated: args.only_present_generated,
            },
            create_flags: CreateFlags {
                depth_inverted: args.depth_inverted,
                depth_infinite: args.depth_inverted,
                async_workload: args.async_compute,
                hdr: args.hdr,
            },
            async_compute: args.async_compute,
            screenshot: args.screenshot,
            validation: args.validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("framegen-demo").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_resolve_to_a_raw_windowed_run() {
        let config = DemoConfig::from(parse(&[]).unwrap());

        assert_eq!(config.layout.addressing(), FrameAddressing::Raw);
        assert_eq!(config.layout.root(), std::path::Path::new("frames"));
        assert_eq!((config.window.width, config.window.height), (1280, 720));
        assert_eq!(config.window.mode, WindowMode::Windowed);
        assert_eq!(config.frame_count, 1);
        assert!(config.generation.enabled);
        assert_eq!(config.generation.dispatch_mode, DispatchMode::Manual);
        assert_eq!(config.create_flags, CreateFlags::default());
        assert!(!config.create_flags.depth_infinite);
        assert!(config.screenshot.is_none());
    }

    #[test]
    fn flags_reach_the_resolved_config() {
        let args = parse(&[
            "--frames-dir",
            "/data/seq",
            "--compressed",
            "--frame-count",
            "30",
            "--frames-per-asset",
            "2",
            "--no-frame-generation",
            "--dispatch-mode",
            "callback",
            "--only-present-generated",
            "--hdr",
            "--depth-inverted",
            "--async-compute",
            "--fullscreen",
            "--screenshot",
            "shot.ppm",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.log_level, log::LevelFilter::Debug);

        let config = DemoConfig::from(args);

        assert_eq!(config.layout.addressing(), FrameAddressing::Compressed);
        assert_eq!(config.frame_count, 30);
        assert_eq!(config.frames_per_asset, 2);
        assert!(!config.generation.enabled);
        assert_eq!(config.generation.dispatch_mode, DispatchMode::Callback);
        assert!(config.generation.only_present_generated);
        assert!(config.create_flags.hdr);
        assert!(config.create_flags.depth_inverted);
        assert!(config.create_flags.depth_infinite);
        assert!(config.create_flags.async_workload);
        assert!(config.async_compute);
        assert_eq!(config.window.mode, WindowMode::BorderlessFullscreen);
        assert_eq!(config.screenshot, Some(PathBuf::from("shot.ppm")));
    }

    #[test]
    fn zero_counts_are_rejected() {
        assert!(parse(&["--frame-count", "0"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--dispatch-mode", "auto"]).is_err());
    }
}
