use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;

use bodyflow_core::pipeline::body_tracking_pipeline::{BodyTrackingConfig, BodyTrackingPipeline};
use bodyflow_core::pipeline::fps_counter::FpsCounter;
use bodyflow_core::pipeline::infrastructure::acquisition_loop::AcquisitionConfig;
use bodyflow_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use bodyflow_core::pipeline::result_sink::{ChannelSink, PipelineEvent, ResultSink};
use bodyflow_core::pipeline::skeleton_export::{
    ExportConfig, ExportingSink, SkeletonExporter, DEFAULT_SUBJECT_HEIGHT_CM,
};
use bodyflow_core::recording::domain::imu_sample::ImuSample;
use bodyflow_core::recording::domain::record_configuration::RecordConfiguration;
use bodyflow_core::recording::domain::seek_origin::SeekOrigin;
use bodyflow_core::recording::infrastructure::container::RecordingHeader;
use bodyflow_core::recording::infrastructure::recording_reader::RecordingReader;
use bodyflow_core::recording::infrastructure::recording_writer::RecordingWriter;
use bodyflow_core::shared::calibration::{Calibration, ColorResolution, DepthMode, FrameRate};
use bodyflow_core::shared::capture::{Capture, Image};
use bodyflow_core::shared::timestamp::Timestamp;
use bodyflow_core::source::infrastructure::playback_source::PlaybackSource;
use bodyflow_core::tracking::domain::joint::JointType;
use bodyflow_core::tracking::domain::skeleton::BodyFrame;
use bodyflow_core::tracking::domain::tracker_configuration::{
    DnnModel, ProcessingMode, SensorOrientation, TrackerConfiguration, DEFAULT_SMOOTHING_FACTOR,
};
use bodyflow_core::tracking::infrastructure::onnx_body_tracker::OnnxBodyTracker;

/// Body tracking over depth camera recordings.
#[derive(Parser)]
#[command(name = "bodyflow")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the configuration, calibration and tags of a recording.
    Info {
        recording: PathBuf,
    },
    /// List captures (and optionally IMU samples) of a recording.
    Dump(DumpArgs),
    /// Run body tracking over a recording.
    Track(TrackArgs),
    /// Write a synthetic depth-only recording.
    Synth(SynthArgs),
}

#[derive(Args)]
struct DumpArgs {
    recording: PathBuf,

    /// Start this many milliseconds after the first capture.
    #[arg(long)]
    seek_ms: Option<i64>,

    /// Stop after this many captures.
    #[arg(long)]
    limit: Option<usize>,

    /// Also list IMU samples.
    #[arg(long)]
    imu: bool,
}

#[derive(Args)]
struct TrackArgs {
    recording: PathBuf,

    /// Processing mode: gpu or cpu.
    #[arg(long, default_value = "gpu")]
    processing_mode: String,

    /// Network size: heavy or lite.
    #[arg(long, default_value = "heavy")]
    model: String,

    /// Explicit model file, bypassing model resolution.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Directory searched for bundled models.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Sensor mounting: default, cw90, ccw90 or flip180.
    #[arg(long, default_value = "default")]
    orientation: String,

    /// Temporal smoothing factor (0.0 = off, 1.0 = frozen).
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_FACTOR)]
    smoothing: f32,

    /// Replay at the recorded frame rate instead of as fast as possible.
    #[arg(long)]
    real_time: bool,

    /// Print one line per tracked frame.
    #[arg(long)]
    verbose_frames: bool,

    /// Write sampled skeletons to a JSON file in this directory.
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Prefix of the export file name and experiment id.
    #[arg(long, default_value = "bodyflow")]
    export_prefix: String,

    /// Subject height in centimetres recorded in the export.
    #[arg(long, default_value_t = DEFAULT_SUBJECT_HEIGHT_CM)]
    subject_height: u32,
}

#[derive(Args)]
struct SynthArgs {
    output: PathBuf,

    /// Number of captures to write.
    #[arg(long, default_value = "90")]
    frames: usize,

    /// Frame rate: 5, 15 or 30.
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Depth mode: nfov-binned, nfov-unbinned, wfov-binned or wfov-unbinned.
    #[arg(long, default_value = "nfov-binned")]
    depth_mode: String,

    /// Also write IMU samples.
    #[arg(long)]
    imu: bool,
}

/// Bounded so a slow terminal never stalls tracking.
const EVENT_CHANNEL_CAPACITY: usize = 64;
const EVENT_POLL: Duration = Duration::from_millis(200);
const IMU_SAMPLES_PER_CAPTURE: u64 = 8;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli.command)?;

    match cli.command {
        Command::Info { recording } => run_info(&recording),
        Command::Dump(args) => run_dump(&args),
        Command::Track(args) => run_track(&args),
        Command::Synth(args) => run_synth(&args),
    }
}

fn run_info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = RecordingReader::open(path)?;
    let config = reader.record_configuration();
    println!("{reader}");
    println!("  captures:     {}", reader.capture_count());
    println!("  imu samples:  {}", reader.imu_sample_count());
    println!("  last stamp:   {}", reader.last_timestamp());
    println!("  depth mode:   {:?}", config.depth_mode);
    println!(
        "  color:        {:?} {:?}{}",
        config.color_resolution,
        config.color_format,
        if config.color_track_enabled { "" } else { " (disabled)" }
    );
    println!("  camera fps:   {}", config.camera_fps.per_second());
    println!("  ir track:     {}", config.ir_track_enabled);
    println!("  imu track:    {}", config.imu_track_enabled);
    println!("  depth delay:  {}us", config.depth_delay_off_color_us);
    println!("  start offset: {}us", config.start_timestamp_offset_us);
    match reader.calibration() {
        Ok(calibration) => {
            let depth = &calibration.depth_camera;
            println!(
                "  depth camera: {}x{} fx={:.1} fy={:.1} cx={:.1} cy={:.1}",
                depth.width, depth.height, depth.fx, depth.fy, depth.cx, depth.cy
            );
        }
        Err(e) => println!("  calibration:  unreadable ({e})"),
    }
    for (name, value) in reader.tags() {
        println!("  tag {name} = {value}");
    }
    Ok(())
}

fn run_dump(args: &DumpArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = RecordingReader::open(&args.recording)?;
    if let Some(ms) = args.seek_ms {
        if !reader.seek(ms.saturating_mul(1000), SeekOrigin::Begin) {
            return Err(format!("Seek to {ms}ms is beyond the end of the recording").into());
        }
    }

    let limit = args.limit.unwrap_or(usize::MAX);
    let mut listed = 0;
    while listed < limit {
        let Some(capture) = reader.next_capture()? else {
            break;
        };
        println!("{}", describe_capture(&capture));
        listed += 1;
    }
    log::info!("Listed {listed} captures");

    if args.imu {
        let mut samples = 0;
        while samples < limit {
            let Some(sample) = reader.next_imu_sample()? else {
                break;
            };
            println!(
                "imu {} acc={:?} gyro={:?} {:.1}C",
                sample.timestamp(),
                sample.acc_sample,
                sample.gyro_sample,
                sample.temperature_c
            );
            samples += 1;
        }
    }
    Ok(())
}

fn describe_capture(capture: &Capture) -> String {
    let mut line = format!("{}", capture.timestamp());
    let images = [
        ("depth", capture.depth_image()),
        ("color", capture.color_image()),
        ("ir", capture.ir_image()),
    ];
    for (name, image) in images {
        if let Some(image) = image {
            line.push_str(&format!(
                " {name}={:?} {}x{}",
                image.format(),
                image.width(),
                image.height()
            ));
        }
    }
    line
}

fn run_track(args: &TrackArgs) -> Result<(), Box<dyn std::error::Error>> {
    let reader = RecordingReader::open(&args.recording)?;
    let calibration = reader.calibration()?;
    let config = BodyTrackingConfig {
        acquisition: AcquisitionConfig::default(),
        tracker: tracker_configuration(args),
    };

    log::info!("Loading body tracking model ({})", args.model);
    let tracker = OnnxBodyTracker::from_configuration(
        &config.tracker,
        &calibration,
        args.model_dir.as_deref(),
    )?;
    let source = PlaybackSource::new(reader).with_real_time_pacing(args.real_time);

    let (channel_sink, events) = ChannelSink::bounded(EVENT_CHANNEL_CAPACITY);
    let sink: Arc<dyn ResultSink> = match &args.export_dir {
        Some(directory) => {
            let exporter = SkeletonExporter::new(ExportConfig {
                directory: directory.clone(),
                prefix: args.export_prefix.clone(),
                subject_height_cm: args.subject_height,
                ..Default::default()
            });
            Arc::new(ExportingSink::new(channel_sink, exporter).with_export_on_completion())
        }
        None => Arc::new(channel_sink),
    };

    let mut pipeline =
        BodyTrackingPipeline::new(Box::new(source), Box::new(tracker), sink, config)?
            .with_logger(Box::new(StdoutPipelineLogger::default()));
    pipeline.start()?;

    let mut fps = FpsCounter::default();
    let mut frames = 0usize;
    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(PipelineEvent::BodyFrame(frame)) => {
                frames += 1;
                if args.verbose_frames {
                    println!("{}", describe_body_frame(&frame));
                }
                if fps.register_frame() {
                    eprint!("\rTracking at {} fps ({} bodies)   ", fps.format(), frame.body_count());
                }
            }
            Ok(PipelineEvent::ImageFrame(_)) => {}
            Ok(PipelineEvent::Failed(_)) | Ok(PipelineEvent::Completed) => break,
            Err(RecvTimeoutError::Timeout) => {
                if pipeline.wait_timeout(Duration::ZERO).is_some() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    eprintln!();

    let outcome = pipeline.wait();
    pipeline.dispose()?;
    outcome?;
    log::info!("Tracked {frames} frames from {}", args.recording.display());
    Ok(())
}

fn describe_body_frame(frame: &BodyFrame) -> String {
    let mut line = format!("{} bodies={}", frame.timestamp(), frame.body_count());
    for body in frame.bodies() {
        let [x, y, z] = body.skeleton[JointType::Pelvis].position_mm();
        line.push_str(&format!(" #{}@({x:.0},{y:.0},{z:.0})", body.id));
    }
    line
}

fn tracker_configuration(args: &TrackArgs) -> TrackerConfiguration {
    TrackerConfiguration {
        processing_mode: parse_processing_mode(&args.processing_mode),
        model: parse_model(&args.model),
        model_path: args.model_path.clone(),
        sensor_orientation: parse_orientation(&args.orientation),
        smoothing_factor: args.smoothing,
    }
}

fn run_synth(args: &SynthArgs) -> Result<(), Box<dyn std::error::Error>> {
    let depth_mode = parse_depth_mode(&args.depth_mode);
    let frame_rate = parse_frame_rate(args.fps);
    let period_us = 1_000_000 / u64::from(frame_rate.per_second());
    let start_us = period_us;

    let mut configuration = RecordConfiguration::depth_only(depth_mode, frame_rate);
    configuration.start_timestamp_offset_us = start_us;
    if args.imu {
        configuration = configuration.with_imu();
    }
    let calibration = Calibration::nominal(depth_mode, ColorResolution::Off).to_raw()?;
    let header =
        RecordingHeader::new(configuration, calibration).with_tag("GENERATOR", "bodyflow synth");

    let mut writer = RecordingWriter::create(&args.output, &header)?;
    let (width, height) = depth_mode.dimensions();
    for i in 0..args.frames as u64 {
        let timestamp = Timestamp::from_micros(start_us + i * period_us);
        let depth = synthetic_depth(width, height, i as usize, args.frames);
        writer.write_capture(&Capture::new().with_depth(Image::from_depth(
            width, height, timestamp, &depth,
        )))?;
        if args.imu {
            for k in 0..IMU_SAMPLES_PER_CAPTURE {
                let at = Timestamp::from_micros(
                    start_us + i * period_us + k * period_us / IMU_SAMPLES_PER_CAPTURE,
                );
                writer.write_imu_sample(&ImuSample {
                    temperature_c: 30.0,
                    acc_sample: [0.0, 0.0, -9.81],
                    acc_timestamp: at,
                    gyro_sample: [0.0; 3],
                    gyro_timestamp: at,
                })?;
            }
        }
    }
    let written = writer.captures_written();
    writer.finish()?;
    log::info!("Wrote {written} captures to {}", args.output.display());
    Ok(())
}

/// A flat wall at 3 m with a figure-sized block at 1.5 m sweeping left to right.
fn synthetic_depth(width: u32, height: u32, index: usize, total: usize) -> Vec<u16> {
    let (w, h) = (width as usize, height as usize);
    let block_w = (w / 6).max(1);
    let travel = w.saturating_sub(block_w);
    let left = travel * index / total.max(1);
    let (top, bottom) = (h / 6, h - h / 6);
    let mut depth = vec![3000u16; w * h];
    for y in top..bottom {
        for x in left..(left + block_w).min(w) {
            depth[y * w + x] = 1500;
        }
    }
    depth
}

fn validate(command: &Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Info { recording } => require_file(recording),
        Command::Dump(args) => {
            require_file(&args.recording)?;
            if args.limit == Some(0) {
                return Err("Limit must be at least 1".into());
            }
            Ok(())
        }
        Command::Track(args) => validate_track(args),
        Command::Synth(args) => {
            if args.frames == 0 {
                return Err("Frame count must be at least 1".into());
            }
            if ![5, 15, 30].contains(&args.fps) {
                return Err(format!("Frame rate must be 5, 15 or 30, got {}", args.fps).into());
            }
            if !DEPTH_MODES.contains(&args.depth_mode.as_str()) {
                return Err(format!(
                    "Depth mode must be one of: {}, got '{}'",
                    DEPTH_MODES.join(", "),
                    args.depth_mode
                )
                .into());
            }
            Ok(())
        }
    }
}

fn validate_track(args: &TrackArgs) -> Result<(), Box<dyn std::error::Error>> {
    require_file(&args.recording)?;
    if args.processing_mode != "gpu" && args.processing_mode != "cpu" {
        return Err(format!(
            "Processing mode must be 'gpu' or 'cpu', got '{}'",
            args.processing_mode
        )
        .into());
    }
    if args.model != "heavy" && args.model != "lite" {
        return Err(format!("Model must be 'heavy' or 'lite', got '{}'", args.model).into());
    }
    if let Some(path) = &args.model_path {
        require_file(path)?;
    }
    if !ORIENTATIONS.contains(&args.orientation.as_str()) {
        return Err(format!(
            "Orientation must be one of: {}, got '{}'",
            ORIENTATIONS.join(", "),
            args.orientation
        )
        .into());
    }
    if !(0.0..=1.0).contains(&args.smoothing) {
        return Err(format!(
            "Smoothing must be between 0.0 and 1.0, got {}",
            args.smoothing
        )
        .into());
    }
    if args.export_prefix.is_empty() || args.export_prefix.contains(['/', '\\']) {
        return Err(format!("Invalid export prefix '{}'", args.export_prefix).into());
    }
    if args.subject_height == 0 {
        return Err("Subject height must be positive".into());
    }
    Ok(())
}

fn require_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("File not found: {}", path.display()).into());
    }
    Ok(())
}

const ORIENTATIONS: [&str; 4] = ["default", "cw90", "ccw90", "flip180"];
const DEPTH_MODES: [&str; 4] = ["nfov-binned", "nfov-unbinned", "wfov-binned", "wfov-unbinned"];

fn parse_processing_mode(mode: &str) -> ProcessingMode {
    if mode == "cpu" {
        ProcessingMode::Cpu
    } else {
        ProcessingMode::Gpu
    }
}

fn parse_model(model: &str) -> DnnModel {
    if model == "lite" {
        DnnModel::Lite
    } else {
        DnnModel::Heavy
    }
}

fn parse_orientation(orientation: &str) -> SensorOrientation {
    match orientation {
        "cw90" => SensorOrientation::Clockwise90,
        "ccw90" => SensorOrientation::CounterClockwise90,
        "flip180" => SensorOrientation::Flip180,
        _ => SensorOrientation::Default,
    }
}

fn parse_depth_mode(mode: &str) -> DepthMode {
    match mode {
        "nfov-unbinned" => DepthMode::NfovUnbinned,
        "wfov-binned" => DepthMode::Wfov2x2Binned,
        "wfov-unbinned" => DepthMode::WfovUnbinned,
        _ => DepthMode::Nfov2x2Binned,
    }
}

fn parse_frame_rate(fps: u32) -> FrameRate {
    match fps {
        5 => FrameRate::Fps5,
        15 => FrameRate::Fps15,
        _ => FrameRate::Fps30,
    }
}
