use anyhow::Result;
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::StdRng;
use rtstudy_core::{RecordSink, StudyError, StudyPhase, StudyResult};
use rtstudy_experiment::{Key, RandomDraws, StudyEvent, TrialStateMachine};
use rtstudy_render::{FontVec, SkiaRenderer};
use rtstudy_timing::{HighPrecisionTimer, Timer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

pub type Study = TrialStateMachine<HighPrecisionTimer, RandomDraws<StdRng>, Box<dyn RecordSink>>;

/// Fullscreen front end. Owns the study for the lifetime of the window and
/// hands it back once the event loop ends.
pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SkiaRenderer>,
    font: Option<FontVec>,
    study: Study,
    frame_timer: HighPrecisionTimer,
    refresh_rate: Option<f64>,
    failure: Option<anyhow::Error>,
    should_exit: bool,
}

impl App {
    pub fn new(study: Study, font: Option<FontVec>) -> Self {
        Self {
            window: None,
            pixels: None,
            renderer: None,
            font,
            study,
            frame_timer: HighPrecisionTimer::new(),
            refresh_rate: None,
            failure: None,
            should_exit: false,
        }
    }

    pub fn run(mut self) -> Result<Study> {
        let event_loop = EventLoop::new()?;
        info!(
            "Participant {}: press SPACE to start, ESC to abort",
            self.study.config().participant_id
        );
        event_loop.run_app(&mut self)?;

        let stats = self.frame_timer.calibration_stats();
        info!(
            frames = self.frame_timer.frame_count(),
            avg_ms = stats.average_frame_time_ns / 1e6,
            jitter_ms = stats.jitter_ns / 1e6,
            min_ms = stats.min_frame_time_ns / 1e6,
            max_ms = stats.max_frame_time_ns / 1e6,
            fps = stats.effective_fps,
            refresh_hz = self.refresh_rate,
            "frame timing"
        );

        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        Ok(self.study)
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow::anyhow!("No monitor available"))?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("Reaktionszeit-Studie")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();
        info!(
            width = size.width,
            height = size.height,
            scale = window.scale_factor(),
            refresh_hz = self.refresh_rate,
            "display configured"
        );

        let surface_texture = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width, size.height, surface_texture)?);
        self.renderer = Some(SkiaRenderer::new(
            size.width,
            size.height,
            self.font.take(),
        )?);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (Some(pixels), Some(renderer)) = (self.pixels.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };

        let view = self.study.view();
        let stats = renderer.render_frame(&view, pixels.frame_mut(), &mut self.frame_timer)?;
        let t = self.frame_timer.now();
        pixels.render()?;
        let present = self.frame_timer.elapsed(t);
        let shown = self.study.timer().now();
        self.study.mark_presented(shown);

        trace!(
            draw_ms = stats.draw.as_secs_f64() * 1e3,
            copy_ms = stats.copy.as_secs_f64() * 1e3,
            present_ms = present.as_secs_f64() * 1e3,
            "frame"
        );
        Ok(())
    }

    fn handle_input(&mut self, key: PhysicalKey, event_loop: &ActiveEventLoop) {
        let PhysicalKey::Code(code) = key else {
            return;
        };
        let result = match code {
            KeyCode::Escape => {
                self.abort(event_loop);
                return;
            }
            KeyCode::Space if self.study.phase() == StudyPhase::StartScreen => self.study.start(),
            KeyCode::Space => self.study.handle_key(Key::Response),
            _ => self.study.handle_key(Key::Other),
        };
        self.apply(result, event_loop);
    }

    fn apply(&mut self, result: StudyResult<Vec<StudyEvent>>, event_loop: &ActiveEventLoop) {
        let events = match result {
            Ok(events) => events,
            Err(e @ StudyError::StorageUnavailable { .. }) => {
                // Trial stays open; the next response press retries the append.
                error!("{e}");
                return;
            }
            Err(e) => {
                self.fail(event_loop, e.into());
                return;
            }
        };
        if events.is_empty() {
            return;
        }

        for event in &events {
            match event {
                StudyEvent::TrialLogged(record) => info!(
                    condition = %record.condition,
                    reaction_ms = record.reaction_time_ms,
                    "trial logged"
                ),
                StudyEvent::QuestionnaireOpened => self.should_exit = true,
                _ => debug!(?event, "study event"),
            }
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(new_size.width, new_size.height) {
                warn!("Failed to resize surface: {e}");
            }
            if let Err(e) = pixels.resize_buffer(new_size.width, new_size.height) {
                warn!("Failed to resize buffer: {e}");
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(e) = renderer.resize(new_size.width, new_size.height) {
                warn!("{e:#}");
            }
        }
        debug!("Display resized to {}x{}", new_size.width, new_size.height);
    }

    /// Closing the window once the trials are done still leads to the questionnaire.
    fn abort(&mut self, event_loop: &ActiveEventLoop) {
        if self.study.phase() != StudyPhase::Questionnaire {
            warn!(
                phase = ?self.study.phase(),
                trial = self.study.trial_index(),
                "aborted by operator"
            );
            self.study.teardown();
        }
        self.shutdown(event_loop);
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.study.teardown();
        self.failure = Some(e);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.abort(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed() && !event.repeat =>
            {
                self.handle_input(event.physical_key, event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
            return;
        }

        let result = self.study.update();
        self.apply(result, event_loop);

        // Sleep until the next study timer; key presses wake the loop earlier.
        match self.study.next_deadline() {
            Some(deadline) => {
                let wait = Duration::from_nanos(deadline.saturating_sub(self.study.timer().now()));
                event_loop.set_control_flow(ControlFlow::WaitUntil(Instant::now() + wait));
            }
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}
