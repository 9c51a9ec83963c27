//! Thin wrapper over Xft for the bar's text. This is the drawing helper the
//! manager treats as a library service: the core never touches Xlib outside
//! this module and the surface it hands out.

use std::ffi::CString;

use x11::xft::{XftColor, XftDraw, XftDrawStringUtf8, XftFont, XftFontOpenName};
use x11::xlib::{Display, Drawable};
use x11::xrender::XRenderColor;

use crate::errors::X11Error;

pub struct Font {
    xft_font: *mut XftFont,
    display: *mut Display,
}

impl Font {
    pub fn new(display: *mut Display, screen: i32, font_name: &str) -> Result<Self, X11Error> {
        let font_name_cstr =
            CString::new(font_name).map_err(|_| X11Error::FontLoadFailed(font_name.to_string()))?;

        let xft_font = unsafe { XftFontOpenName(display, screen, font_name_cstr.as_ptr()) };
        if xft_font.is_null() {
            return Err(X11Error::FontLoadFailed(font_name.to_string()));
        }

        Ok(Font { xft_font, display })
    }

    pub fn height(&self) -> u16 {
        unsafe { (*self.xft_font).height as u16 }
    }

    pub fn ascent(&self) -> i16 {
        unsafe { (*self.xft_font).ascent as i16 }
    }

    pub fn text_width(&self, text: &str) -> u16 {
        unsafe {
            let mut extents = std::mem::zeroed();
            x11::xft::XftTextExtentsUtf8(
                self.display,
                self.xft_font,
                text.as_ptr(),
                text.len() as i32,
                &mut extents,
            );
            extents.width
        }
    }
}

impl Drop for Font {
    fn drop(&mut self) {
        unsafe {
            if !self.xft_font.is_null() {
                x11::xft::XftFontClose(self.display, self.xft_font);
            }
        }
    }
}

/// An off-screen pixmap plus the Xft draw handle targeting it. The bar
/// renders a frame here and blits it to the bar window in one copy.
pub struct DrawingSurface {
    display: *mut Display,
    pixmap: x11::xlib::Pixmap,
    xft_draw: *mut XftDraw,
    width: u32,
    height: u32,
}

impl DrawingSurface {
    pub fn new(
        display: *mut Display,
        window: Drawable,
        screen: i32,
        width: u32,
        height: u32,
    ) -> Result<Self, X11Error> {
        unsafe {
            let depth = x11::xlib::XDefaultDepth(display, screen);
            let visual = x11::xlib::XDefaultVisual(display, screen);
            let colormap = x11::xlib::XDefaultColormap(display, screen);

            let pixmap = x11::xlib::XCreatePixmap(display, window, width, height, depth as u32);
            let xft_draw = x11::xft::XftDrawCreate(display, pixmap, visual, colormap);
            if xft_draw.is_null() {
                x11::xlib::XFreePixmap(display, pixmap);
                return Err(X11Error::DrawCreateFailed);
            }

            Ok(Self {
                display,
                pixmap,
                xft_draw,
                width,
                height,
            })
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn fill_rect(&self, color: u32, x: i32, y: i32, width: u32, height: u32) {
        unsafe {
            let gc = x11::xlib::XCreateGC(self.display, self.pixmap, 0, std::ptr::null_mut());
            x11::xlib::XSetForeground(self.display, gc, color as u64);
            x11::xlib::XFillRectangle(self.display, self.pixmap, gc, x, y, width, height);
            x11::xlib::XFreeGC(self.display, gc);
        }
    }

    pub fn draw_text(&self, font: &Font, color: u32, x: i16, y: i16, text: &str) {
        let red = ((color >> 16) & 0xff) as u16;
        let green = ((color >> 8) & 0xff) as u16;
        let blue = (color & 0xff) as u16;

        let render_color = XRenderColor {
            red: red << 8 | red,
            green: green << 8 | green,
            blue: blue << 8 | blue,
            alpha: 0xffff,
        };

        let mut xft_color: XftColor = unsafe { std::mem::zeroed() };

        unsafe {
            x11::xft::XftColorAllocValue(
                x11::xft::XftDrawDisplay(self.xft_draw),
                x11::xft::XftDrawVisual(self.xft_draw),
                x11::xft::XftDrawColormap(self.xft_draw),
                &render_color,
                &mut xft_color,
            );

            XftDrawStringUtf8(
                self.xft_draw,
                &xft_color,
                font.xft_font,
                x as i32,
                y as i32,
                text.as_ptr(),
                text.len() as i32,
            );

            x11::xft::XftColorFree(
                x11::xft::XftDrawDisplay(self.xft_draw),
                x11::xft::XftDrawVisual(self.xft_draw),
                x11::xft::XftDrawColormap(self.xft_draw),
                &mut xft_color,
            );
        }
    }

    /// Blit the rendered frame onto the bar window and push it out.
    pub fn present(&self, window: Drawable) {
        unsafe {
            let gc = x11::xlib::XCreateGC(self.display, window, 0, std::ptr::null_mut());
            x11::xlib::XCopyArea(
                self.display,
                self.pixmap,
                window,
                gc,
                0,
                0,
                self.width,
                self.height,
                0,
                0,
            );
            x11::xlib::XFreeGC(self.display, gc);
            x11::xlib::XSync(self.display, 1);
        }
    }
}

impl Drop for DrawingSurface {
    fn drop(&mut self) {
        unsafe {
            x11::xft::XftDrawDestroy(self.xft_draw);
            x11::xlib::XFreePixmap(self.display, self.pixmap);
        }
    }
}
