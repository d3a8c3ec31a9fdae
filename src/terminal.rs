// SPDX-License-Identifier: GPL-3.0-only

//! Terminal-based depth camera viewer
//!
//! Renders the published video or depth surface to the terminal using
//! Unicode half-block characters for improved vertical resolution.

use crate::backends::DeviceSession;
use crate::backends::driver::DeviceFlag;
use crate::surface::{PixelSurface, Surface, SurfacePixels};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Stream shown by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Video,
    Depth,
}

impl View {
    fn toggled(self) -> Self {
        match self {
            View::Video => View::Depth,
            View::Depth => View::Video,
        }
    }

    fn label(self) -> &'static str {
        match self {
            View::Video => "video",
            View::Depth => "depth",
        }
    }
}

/// Run the terminal viewer on an already constructed session
///
/// The session is opened here and closed again before returning.
pub fn run(session: &mut DeviceSession) -> Result<(), Box<dyn std::error::Error>> {
    // Ctrl+C arrives as a key event in raw mode, the handler covers the
    // window before raw mode is enabled
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "Failed to install Ctrl+C handler");
    }

    session.open();

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, session, &interrupted);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    session.close();
    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut DeviceSession,
    interrupted: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut view = View::Video;
    let mut mirror_depth = false;

    while !interrupted.load(Ordering::SeqCst) {
        session.update();

        let status = build_status_message(session, view, mirror_depth);
        let surface = match view {
            View::Video => session.video_surface(),
            View::Depth => session.depth_surface(),
        };
        let frame_widget = FrameWidget { surface };

        // Draw
        terminal.draw(|f| {
            let area = f.area();

            // Reserve bottom line for status
            let camera_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(1),
            };

            f.render_widget(&frame_widget, camera_area);

            // Render status bar
            let status_area = Rect {
                x: area.x,
                y: area.height.saturating_sub(1),
                width: area.width,
                height: 1,
            };

            f.render_widget(StatusBar { message: &status }, status_area);
        })?;

        // Handle input with timeout for frame updates
        if event::poll(Duration::from_millis(16))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                KeyCode::Char('q') => break,
                KeyCode::Char('d') => {
                    view = view.toggled();
                    info!(view = view.label(), "Switched view");
                }
                KeyCode::Char('m') => {
                    mirror_depth = !mirror_depth;
                    session.apply_flag(DeviceFlag::MirrorDepth, mirror_depth);
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn build_status_message(session: &DeviceSession, view: View, mirror_depth: bool) -> String {
    let stats = session.stats();
    format!(
        "{} | {} | video {} depth {} | 'd' {} | 'm' mirror {} | 'q' quit",
        session.state(),
        view.label(),
        stats.video_frames,
        stats.depth_frames,
        view.toggled().label(),
        if mirror_depth { "on" } else { "off" },
    )
}

/// Widget that renders a surface using half-block characters
struct FrameWidget<'a> {
    surface: &'a PixelSurface,
}

impl Widget for &FrameWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let (width, height) = (self.surface.width(), self.surface.height());
        if matches!(self.surface.pixels(), SurfacePixels::Empty) || width == 0 || height == 0 {
            // No frame yet - show placeholder
            let msg = "Waiting for device...";
            let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
            let y = area.y + area.height / 2;
            if y < area.y + area.height && x < area.x + area.width {
                buf.set_string(x, y, msg, ratatui::style::Style::default());
            }
            return;
        }

        // Each terminal cell displays 2 vertical pixels using half-block characters
        let frame_aspect = width as f64 / height as f64;
        let term_width = area.width as f64;
        let term_height = (area.height * 2) as f64;

        let (display_width, display_height) = if term_width / term_height > frame_aspect {
            let h = term_height;
            let w = h * frame_aspect;
            (w as u16, (h / 2.0) as u16)
        } else {
            let w = term_width;
            let h = w / frame_aspect;
            (w as u16, (h / 2.0) as u16)
        };
        if display_width == 0 || display_height == 0 {
            return;
        }

        // Center the image
        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        let x_scale = width as f64 / display_width as f64;
        let y_scale = height as f64 / (display_height * 2) as f64;

        for ty in 0..display_height {
            for tx in 0..display_width {
                let term_x = x_offset + tx;
                let term_y = y_offset + ty;

                if term_x >= area.x + area.width || term_y >= area.y + area.height {
                    continue;
                }

                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                let top_color = sample_pixel(self.surface, src_x, src_y_top);
                let bottom_color = sample_pixel(self.surface, src_x, src_y_bottom);

                if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                    cell.set_char('▀');
                    cell.set_fg(top_color);
                    cell.set_bg(bottom_color);
                }
            }
        }
    }
}

fn sample_pixel(surface: &PixelSurface, x: u32, y: u32) -> Color {
    let x = x.min(surface.width().saturating_sub(1)) as usize;
    let y = y.min(surface.height().saturating_sub(1)) as usize;
    let row = surface.width() as usize;

    match surface.pixels() {
        SurfacePixels::Rgb8(data) => {
            let idx = (y * row + x) * 3;
            match data.get(idx..idx + 3) {
                Some(rgb) => Color::Rgb(rgb[0], rgb[1], rgb[2]),
                None => Color::Black,
            }
        }
        SurfacePixels::Gray16(data) => {
            // High byte of the 16-bit display range
            let v = data.get(y * row + x).map(|&d| (d >> 8) as u8).unwrap_or(0);
            Color::Rgb(v, v, v)
        }
        SurfacePixels::Empty => Color::Black,
    }
}

/// Simple status bar widget
struct StatusBar<'a> {
    message: &'a str,
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let style = ratatui::style::Style::default()
            .bg(Color::DarkGray)
            .fg(Color::White);

        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_style(style);
            }
        }

        let msg_x = area.x + (area.width.saturating_sub(self.message.len() as u16)) / 2;
        buf.set_string(msg_x, area.y, self.message, style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::driver::{FrameMode, PixelBuffer};
    use crate::surface::SurfaceFormat;

    #[test]
    fn test_sample_rgb_and_depth() {
        let mut surface = PixelSurface::new();
        surface.allocate(2, 1, SurfaceFormat::Rgb8);
        let mut mode = FrameMode::video_medium();
        mode.width = 2;
        mode.height = 1;
        let mut frame = PixelBuffer::<u8>::for_mode(&mode);
        frame.as_mut_slice().copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        surface.load_rgb8(&frame);
        assert_eq!(sample_pixel(&surface, 1, 0), Color::Rgb(4, 5, 6));
        // Out of range coordinates clamp to the last pixel
        assert_eq!(sample_pixel(&surface, 9, 9), Color::Rgb(4, 5, 6));

        let mut depth_surface = PixelSurface::new();
        depth_surface.allocate(1, 1, SurfaceFormat::Gray16);
        let mut depth = PixelBuffer::<u16>::new(1, 1, 1);
        depth.fill(0xAB00);
        depth_surface.load_gray16(&depth);
        assert_eq!(sample_pixel(&depth_surface, 0, 0), Color::Rgb(0xAB, 0xAB, 0xAB));
    }

    #[test]
    fn test_view_toggle() {
        assert_eq!(View::Video.toggled(), View::Depth);
        assert_eq!(View::Depth.toggled().label(), "video");
    }
}
