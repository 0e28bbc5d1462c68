#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    fs::{self, File},
    sync::Arc,
};

use clap::Parser;
use rhal::{
    ash::vk,
    config::ContextConfig,
    context::{Context, PresentRequest},
    instance::VulkanLogLevel,
    memory::MemoryAccess,
    resource::{Image, ImageDesc, Placement},
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow},
    window::{Window as WinitWindow, WindowAttributes, WindowId},
};

const TIMESTAMP_LOG_INTERVAL: u64 = 240;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            //Off never installs a subscriber, so this arm is unused
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Enables the validation layer at this severity.
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    #[arg(short, long, default_value_t = 2)]
    frames_in_flight: usize,
    /// Recreate command pools every frame.
    #[arg(long)]
    safe_mode: bool,
    #[arg(long, default_value_t = 8)]
    timestamp_queries: u32,
}

impl CliArgs {
    fn context_config(&self) -> ContextConfig {
        let defaults = ContextConfig::default();
        ContextConfig {
            app_name: String::from("rhal-demo"),
            frames_in_flight: self.frames_in_flight,
            safe_mode: self.safe_mode || self.graphics_debug_level.is_some(),
            validation_log_level: self
                .graphics_debug_level
                .map(Into::into)
                .unwrap_or(defaults.validation_log_level),
            timestamp_queries_per_frame: self.timestamp_queries,
            ..defaults
        }
        .with_env_overrides()
    }
}

fn main() -> eyre::Result<()> {
    let app_dirs = directories::ProjectDirs::from("", "rhal", "rhal-demo");

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        println!("log_file_path: {}", log_file_path.display());
        println!("cli_args: {:#?}", cli_args);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    let event_loop = winit::event_loop::EventLoop::builder().build()?;
    let mut app = DemoApp {
        config: cli_args.context_config(),
        window: None,
        running: None,
        frame: 0,
    };

    tracing::trace!("Entering main event loop");
    Ok(event_loop.run_app(&mut app)?)
}

struct DemoApp {
    config: ContextConfig,
    window: Option<Arc<WinitWindow>>,
    /// `None` while suspended.
    running: Option<Running>,
    frame: u64,
}

/// Field order is drop order: the target holds device memory the context
/// checks for on drop.
struct Running {
    target: Option<Image>,
    context: Context<WinitWindow>,
}

impl Running {
    /// Wait for the GPU, then drop the target and the context.
    fn shut_down(self) {
        if let Err(e) = self.context.wait_idle() {
            tracing::error!("Error while waiting for device idle: {}", e);
        }
    }
}

fn window_extent(win: &WinitWindow) -> vk::Extent2D {
    let size = win.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn clear_color(frame: u64) -> [f32; 4] {
    let t = (frame % 360) as f32 / 360.0 * std::f32::consts::TAU;
    [
        0.5 + 0.5 * t.sin(),
        0.5 + 0.5 * (t + 2.1).sin(),
        0.5 + 0.5 * (t + 4.2).sin(),
        1.0,
    ]
}

fn color_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
        .src_access_mask(src_access)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        )
}

impl DemoApp {
    fn start(&mut self, win: Arc<WinitWindow>) -> eyre::Result<()> {
        //SAFETY: the context is dropped in `suspended` before the surface
        //goes away
        let context = unsafe { Context::new(self.config.clone(), win) }?;
        self.running = Some(Running {
            target: None,
            context,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shut_down();
        }
    }

    /// Make sure the offscreen target matches `extent`.
    fn ensure_target(
        running: &mut Running,
        extent: vk::Extent2D,
    ) -> eyre::Result<()> {
        if running
            .target
            .as_ref()
            .is_some_and(|target| target.extent() == extent)
        {
            return Ok(());
        }
        running.context.wait_idle()?;
        running.target = None;
        let image = running.context.allocator().create_image(
            &ImageDesc {
                extent,
                format: vk::Format::R8G8B8A8_UNORM,
                usage: vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                access: MemoryAccess::None,
                name: "demo target",
            },
            Placement::Dedicated,
        )?;
        tracing::debug!("Created {}x{} target", extent.width, extent.height);
        running.target = Some(image);
        Ok(())
    }

    fn draw(&mut self) -> eyre::Result<()> {
        let (Some(win), Some(running)) = (&self.window, &mut self.running)
        else {
            return Ok(());
        };
        let extent = window_extent(win);
        let context = &mut running.context;
        context.begin_frame()?;

        if extent.width == 0 || extent.height == 0 {
            context.end_frame(None)?;
            return Ok(());
        }
        Self::ensure_target(running, extent)?;
        let context = &mut running.context;
        let Some(target) = running.target.as_ref() else {
            return Ok(());
        };

        let command_buffer = context.command_buffer()?;
        let timestamps = context.frames().previous_timestamps().len() >= 2;
        let start = if context.config().timestamp_queries_per_frame >= 2 {
            context
                .write_timestamp(command_buffer, vk::PipelineStageFlags2::TOP_OF_PIPE)
                .ok()
        } else {
            None
        };

        let device = Arc::clone(context.device());
        let image = target.raw_handle();
        //SAFETY: command_buffer is recording and the target is only used
        //by this frame's commands
        unsafe {
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default().image_memory_barriers(&[color_barrier(
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::AccessFlags2::NONE,
                    vk::AccessFlags2::TRANSFER_WRITE,
                )]),
            );
            device.cmd_clear_color_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                clear_color(self.frame),
                &[vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1)],
            );
            device.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::default().image_memory_barriers(&[color_barrier(
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags2::TRANSFER_WRITE,
                    vk::AccessFlags2::TRANSFER_READ,
                )]),
            );
        }
        if start.is_some() {
            let _ = context.write_timestamp(command_buffer, vk::PipelineStageFlags2::ALL_TRANSFER);
        }

        if timestamps
            && self.frame % TIMESTAMP_LOG_INTERVAL == 0
            && let Some(ns) = context.elapsed_ns(0, 1)
        {
            tracing::info!("Clear took {:.3} ms on the GPU", ns / 1.0e6);
        }

        let outcome = context.end_frame(Some(PresentRequest {
            image,
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            extent: target.extent(),
            surface_extent: extent,
        }))?;
        tracing::trace!("Frame {} present outcome: {:?}", self.frame, outcome);
        self.frame += 1;
        Ok(())
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            tracing::warn!("resumed() called while already running");
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        let win = match &self.window {
            Some(win) => Arc::clone(win),
            None => match event_loop.create_window(
                WindowAttributes::default()
                    .with_title("rhal-demo")
                    .with_inner_size(LogicalSize {
                        width: 1600,
                        height: 900,
                    }),
            ) {
                Ok(w) => {
                    let w = Arc::new(w);
                    self.window = Some(Arc::clone(&w));
                    w
                }
                Err(e) => {
                    tracing::error!("Error while creating window: {}", e);
                    event_loop.exit();
                    return;
                }
            },
        };
        if let Err(e) = self.start(win) {
            tracing::error!("Error while creating context: {}", e);
            event_loop.exit();
            return;
        }
        tracing::debug!("State transition: Suspended -> Running");
    }

    fn suspended(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        self.stop();
        tracing::debug!("State transition: Running -> Suspended");
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        window_event: WindowEvent,
    ) {
        if self.window.as_ref().is_none_or(|w| w.id() != window_id) {
            return;
        }
        match window_event {
            WindowEvent::CloseRequested => {
                tracing::trace!("Close window request received for window");
                self.stop();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.draw() {
                    tracing::error!("Error while drawing frame: {}", e);
                    self.stop();
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.running.is_some()
            && let Some(win) = &self.window
        {
            win.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_map_onto_context_config() {
        let args = CliArgs::parse_from([
            "rhal-demo",
            "--frames-in-flight",
            "3",
            "--graphics-debug-level",
            "info",
        ]);
        let config = args.context_config();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.validation_log_level, VulkanLogLevel::Info);
        assert_eq!(config.app_name, "rhal-demo");
    }

    #[test]
    fn clear_color_stays_in_unit_range() {
        for frame in [0, 90, 180, 359, 360, 10_000] {
            for c in clear_color(frame) {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }
}
