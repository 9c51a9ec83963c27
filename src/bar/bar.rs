use x11rb::COPY_DEPTH_FROM_PARENT;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use super::font::{DrawingSurface, Font};
use crate::Config;
use crate::errors::X11Error;

/// What a button press on the bar landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarClick {
    Title,
    Status,
}

/// Title of the focused client drawn on the left, the root-window status
/// text on the right, the head client's floating marker in the corner.
pub struct Bar {
    window: Window,
    width: u16,
    height: u16,
    surface: DrawingSurface,
    needs_redraw: bool,
    status_width: u16,
    scheme_normal: crate::ColorScheme,
    scheme_selected: crate::ColorScheme,
}

impl Bar {
    pub fn new(
        connection: &RustConnection,
        screen: &Screen,
        screen_num: usize,
        config: &Config,
        display: *mut x11::xlib::Display,
        font: &Font,
        y: i16,
        width: u16,
    ) -> Result<Self, X11Error> {
        let window = connection.generate_id()?;
        let height = font.height() + 2;

        connection.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            screen.root,
            0,
            y,
            width,
            height,
            0,
            WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &CreateWindowAux::new()
                .background_pixel(config.scheme_normal.background)
                .event_mask(EventMask::EXPOSURE | EventMask::BUTTON_PRESS)
                .override_redirect(1),
        )?;
        connection.map_window(window)?;
        connection.flush()?;

        let surface = DrawingSurface::new(
            display,
            window as x11::xlib::Drawable,
            screen_num as i32,
            width as u32,
            height as u32,
        )?;

        Ok(Bar {
            window,
            width,
            height,
            surface,
            needs_redraw: true,
            status_width: 0,
            scheme_normal: config.scheme_normal,
            scheme_selected: config.scheme_selected,
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn invalidate(&mut self) {
        self.needs_redraw = true;
    }

    /// Move/resize after a bar toggle or a root geometry change; a width
    /// change needs a new backing pixmap.
    pub fn configure(
        &mut self,
        connection: &RustConnection,
        display: *mut x11::xlib::Display,
        screen_num: usize,
        y: i32,
        width: u16,
    ) -> Result<(), X11Error> {
        connection.configure_window(
            self.window,
            &ConfigureWindowAux::new()
                .x(0)
                .y(y)
                .width(width as u32)
                .height(self.height as u32),
        )?;

        if width != self.width {
            self.width = width;
            self.surface = DrawingSurface::new(
                display,
                self.window as x11::xlib::Drawable,
                screen_num as i32,
                width as u32,
                self.height as u32,
            )?;
        }
        self.needs_redraw = true;
        Ok(())
    }

    pub fn draw(
        &mut self,
        font: &Font,
        head: Option<(&str, bool, bool)>,
        status_text: &str,
    ) {
        if !self.needs_redraw {
            return;
        }

        let normal = self.scheme_normal;
        let selected = self.scheme_selected;
        let padding = (font.height() / 2).max(2) as i16;
        let text_y = 1 + font.ascent();

        self.surface
            .fill_rect(normal.background, 0, 0, self.width as u32, self.height as u32);

        // Status on the right, 2px right padding.
        self.status_width = font.text_width(status_text) + padding as u16 + 2;
        let status_x = self.width as i16 - self.status_width as i16;
        self.surface
            .draw_text(font, normal.foreground, status_x + padding / 2, text_y, status_text);

        // Focused title fills the rest.
        let title_width = status_x.max(0) as u32;
        if let Some((title, is_floating, is_fixed)) = head {
            self.surface
                .fill_rect(selected.background, 0, 0, title_width, self.height as u32);
            self.surface
                .draw_text(font, selected.foreground, padding, text_y, title);

            if is_floating {
                let box_size = (font.height() / 6 + 2) as u32;
                let box_offset = (font.height() / 9) as i32;
                self.surface.fill_rect(
                    selected.foreground,
                    box_offset,
                    box_offset,
                    box_size,
                    box_size,
                );
                if !is_fixed {
                    // Hollow marker for resizable floaters.
                    self.surface.fill_rect(
                        selected.background,
                        box_offset + 1,
                        box_offset + 1,
                        box_size.saturating_sub(2),
                        box_size.saturating_sub(2),
                    );
                }
            }
        }

        self.surface.present(self.window as x11::xlib::Drawable);
        self.needs_redraw = false;
    }

    pub fn destroy(&self, connection: &RustConnection) -> Result<(), X11Error> {
        connection.unmap_window(self.window)?;
        connection.destroy_window(self.window)?;
        Ok(())
    }

    pub fn handle_click(&self, click_x: i16) -> BarClick {
        if click_x >= self.width as i16 - self.status_width as i16 {
            BarClick::Status
        } else {
            BarClick::Title
        }
    }
}
