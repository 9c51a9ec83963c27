use std::collections::VecDeque;
use std::os::unix::io::AsRawFd;

use tracing::{debug, error, info, warn};
use x11rb::connection::Connection;
use x11rb::cursor::Handle as CursorHandle;
use x11rb::protocol::ErrorKind;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::Config;
use crate::bar::{Bar, BarClick};
use crate::client::{Client, Registry};
use crate::control::{self, Command, ControlSocket, StateSnapshot};
use crate::errors::{WmError, X11Error};
use crate::keyboard::{self, Arg, KeyAction, KeyboardMapping, handlers, modifiers_to_mask};
use crate::monitor::Monitor;
use crate::signal;
use crate::size_hints::{Bounds, SizeHints, WM_SIZE_HINTS_FIELDS, resolve};

type WmResult<T> = Result<T, WmError>;

/// Bounded wait so control-plane requests are noticed within ~100ms even
/// when the display connection is idle.
const POLL_TIMEOUT_MS: i32 = 100;

/// Drag geometry updates are throttled to roughly one per frame at 60Hz.
const MOTION_THROTTLE_MS: u32 = 1000 / 60;

const WM_STATE_WITHDRAWN: u32 = 0;
const WM_STATE_NORMAL: u32 = 1;
const WM_STATE_ICONIC: u32 = 3;

const XURGENCY_HINT: u32 = 1 << 8;
const INPUT_HINT: u32 = 1 << 0;

struct AtomCache {
    wm_protocols: Atom,
    wm_delete_window: Atom,
    wm_state: Atom,
    wm_take_focus: Atom,
    wm_name: Atom,
    net_supported: Atom,
    net_supporting_wm_check: Atom,
    net_active_window: Atom,
    net_wm_name: Atom,
    net_wm_state: Atom,
    net_wm_window_type: Atom,
    net_wm_window_type_dialog: Atom,
    net_client_list: Atom,
    utf8_string: Atom,
}

impl AtomCache {
    fn new(connection: &RustConnection) -> WmResult<Self> {
        let wm_protocols = connection
            .intern_atom(false, b"WM_PROTOCOLS")?
            .reply()?
            .atom;

        let wm_delete_window = connection
            .intern_atom(false, b"WM_DELETE_WINDOW")?
            .reply()?
            .atom;

        let wm_state = connection.intern_atom(false, b"WM_STATE")?.reply()?.atom;

        let wm_take_focus = connection
            .intern_atom(false, b"WM_TAKE_FOCUS")?
            .reply()?
            .atom;

        let wm_name = AtomEnum::WM_NAME.into();

        let net_supported = connection
            .intern_atom(false, b"_NET_SUPPORTED")?
            .reply()?
            .atom;

        let net_supporting_wm_check = connection
            .intern_atom(false, b"_NET_SUPPORTING_WM_CHECK")?
            .reply()?
            .atom;

        let net_active_window = connection
            .intern_atom(false, b"_NET_ACTIVE_WINDOW")?
            .reply()?
            .atom;

        let net_wm_name = connection
            .intern_atom(false, b"_NET_WM_NAME")?
            .reply()?
            .atom;

        let net_wm_state = connection
            .intern_atom(false, b"_NET_WM_STATE")?
            .reply()?
            .atom;

        let net_wm_window_type = connection
            .intern_atom(false, b"_NET_WM_WINDOW_TYPE")?
            .reply()?
            .atom;

        let net_wm_window_type_dialog = connection
            .intern_atom(false, b"_NET_WM_WINDOW_TYPE_DIALOG")?
            .reply()?
            .atom;

        let net_client_list = connection
            .intern_atom(false, b"_NET_CLIENT_LIST")?
            .reply()?
            .atom;

        let utf8_string = connection.intern_atom(false, b"UTF8_STRING")?.reply()?.atom;

        Ok(Self {
            wm_protocols,
            wm_delete_window,
            wm_state,
            wm_take_focus,
            wm_name,
            net_supported,
            net_supporting_wm_check,
            net_active_window,
            net_wm_name,
            net_wm_state,
            net_wm_window_type,
            net_wm_window_type_dialog,
            net_client_list,
            utf8_string,
        })
    }
}

struct Cursors {
    normal: Cursor,
    moving: Cursor,
    resizing: Cursor,
}

/// Mouse move/resize as an explicit state entered from the main loop on a
/// modkey button press and left strictly on button release. While a drag is
/// active only motion, release and the configure/expose/map-request events
/// are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragState {
    Idle,
    Moving {
        window: Window,
        start_root_x: i16,
        start_root_y: i16,
        orig_x: i16,
        orig_y: i16,
        last_motion: u32,
    },
    Resizing {
        window: Window,
        orig_x: i16,
        orig_y: i16,
        last_motion: u32,
    },
}

pub struct WindowManager {
    config: Config,
    connection: RustConnection,
    screen_number: usize,
    root: Window,
    screen: Screen,
    wm_check_window: Window,
    atoms: AtomCache,
    cursors: Cursors,
    display: *mut x11::xlib::Display,
    font: crate::bar::font::Font,
    registry: Registry,
    monitor: Monitor,
    bar: Bar,
    control: ControlSocket,
    status_text: String,
    keyboard_mapping: Option<KeyboardMapping>,
    drag: DragState,
    pending_events: VecDeque<Event>,
    running: bool,
}

impl WindowManager {
    pub fn new(config: Config) -> WmResult<Self> {
        let (connection, screen_number) = x11rb::connect(None)?;
        let root = connection.setup().roots[screen_number].root;
        let screen = connection.setup().roots[screen_number].clone();

        let resource_db = x11rb::resource_manager::new_from_default(&connection)?;
        let cursor_handle = CursorHandle::new(&connection, screen_number, &resource_db)?.reply()?;
        let cursors = Cursors {
            normal: cursor_handle.load_cursor(&connection, "left_ptr")?,
            moving: cursor_handle.load_cursor(&connection, "fleur")?,
            resizing: cursor_handle.load_cursor(&connection, "sizing")?,
        };

        // Selecting SubstructureRedirect on the root is the "I am the window
        // manager" claim; exactly one client may hold it.
        let become_wm = connection
            .change_window_attributes(
                root,
                &ChangeWindowAttributesAux::new()
                    .cursor(cursors.normal)
                    .event_mask(
                        EventMask::SUBSTRUCTURE_REDIRECT
                            | EventMask::SUBSTRUCTURE_NOTIFY
                            | EventMask::BUTTON_PRESS
                            | EventMask::ENTER_WINDOW
                            | EventMask::LEAVE_WINDOW
                            | EventMask::STRUCTURE_NOTIFY
                            | EventMask::PROPERTY_CHANGE,
                    ),
            )?
            .check();
        if let Err(e) = become_wm {
            debug!("substructure redirect rejected: {e}");
            return Err(WmError::OtherWmRunning);
        }

        let atoms = AtomCache::new(&connection)?;

        let display = unsafe { x11::xlib::XOpenDisplay(std::ptr::null()) };
        if display.is_null() {
            return Err(WmError::X11(X11Error::DisplayOpenFailed));
        }

        let font = crate::bar::font::Font::new(display, screen_number as i32, &config.font)?;
        let bar_height = (font.height() + 2) as i32;

        let mut monitor = Monitor::new(
            screen.width_in_pixels as u32,
            screen.height_in_pixels as u32,
        );
        monitor.show_bar = config.show_bar;
        monitor.update_bar_position(bar_height);

        let bar = Bar::new(
            &connection,
            &screen,
            screen_number,
            &config,
            display,
            &font,
            monitor.bar_y_position as i16,
            screen.width_in_pixels,
        )?;

        // Supporting window for _NET_SUPPORTING_WM_CHECK.
        let wm_check_window = connection.generate_id()?;
        connection.create_window(
            screen.root_depth,
            wm_check_window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new(),
        )?;
        connection.change_property(
            PropMode::REPLACE,
            wm_check_window,
            atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            32,
            1,
            &wm_check_window.to_ne_bytes(),
        )?;
        connection.change_property(
            PropMode::REPLACE,
            wm_check_window,
            atoms.net_wm_name,
            atoms.utf8_string,
            8,
            6,
            b"sockwm",
        )?;
        connection.change_property(
            PropMode::REPLACE,
            root,
            atoms.net_supporting_wm_check,
            AtomEnum::WINDOW,
            32,
            1,
            &wm_check_window.to_ne_bytes(),
        )?;

        let supported_atoms = [
            atoms.net_supported,
            atoms.net_supporting_wm_check,
            atoms.net_active_window,
            atoms.net_wm_name,
            atoms.net_wm_state,
            atoms.net_wm_window_type,
            atoms.net_wm_window_type_dialog,
            atoms.net_client_list,
        ];
        let supported_bytes: Vec<u8> = supported_atoms
            .iter()
            .flat_map(|a| a.to_ne_bytes())
            .collect();
        connection.change_property(
            PropMode::REPLACE,
            root,
            atoms.net_supported,
            AtomEnum::ATOM,
            32,
            supported_atoms.len() as u32,
            &supported_bytes,
        )?;
        connection.delete_property(root, atoms.net_client_list)?;

        let control = ControlSocket::bind(&config.socket_path)?;

        let mut window_manager = Self {
            config,
            connection,
            screen_number,
            root,
            screen,
            wm_check_window,
            atoms,
            cursors,
            display,
            font,
            registry: Registry::new(),
            monitor,
            bar,
            control,
            status_text: String::new(),
            keyboard_mapping: None,
            drag: DragState::Idle,
            pending_events: VecDeque::new(),
            running: true,
        };

        signal::ignore_children();
        window_manager.refresh_keyboard_mapping()?;
        window_manager.grab_keys()?;
        window_manager.update_status()?;
        window_manager.scan_existing_windows()?;
        window_manager.focus(None)?;
        window_manager.arrange()?;
        window_manager.run_autostart_commands();

        Ok(window_manager)
    }

    /// The dual-source loop: one bounded poll over the display connection
    /// and the control listener. Display events are batch-drained first so
    /// redraws never starve; the control socket is checked at most once per
    /// wake. The run flag is honored only at iteration boundaries.
    pub fn run(&mut self) -> WmResult<()> {
        info!("sockwm running on screen {}", self.screen_number);

        let x_fd = self.connection.stream().as_raw_fd();
        let control_fd = self.control.as_raw_fd();

        while self.running {
            self.connection.flush()?;

            let mut fds = [
                libc::pollfd {
                    fd: x_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: control_fd,
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), 2, POLL_TIMEOUT_MS) };
            if ready < 0 {
                let os_error = std::io::Error::last_os_error();
                if os_error.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(WmError::Io(os_error));
            }

            while let Some(event) = self.next_event()? {
                self.handle_event(event)?;
                if !self.running {
                    break;
                }
            }

            if self.running && fds[1].revents & libc::POLLIN != 0 {
                self.dispatch_control_event()?;
            }
        }

        Ok(())
    }

    /// Teardown runs unconditionally once shutdown is triggered; failures
    /// are logged, never propagated. The control socket file disappears when
    /// the listener drops with the manager.
    pub fn cleanup(&mut self) {
        while let Some(window) = self.registry.head_window() {
            if let Err(e) = self.unmanage_window(window, false) {
                warn!("cleanup: failed to unmanage window {window}: {e}");
                self.registry.detach(window);
            }
        }

        let _ = self.connection.ungrab_key(Grab::ANY, self.root, ModMask::ANY);
        let _ = self.bar.destroy(&self.connection);
        let _ = self.connection.destroy_window(self.wm_check_window);
        let _ = self.connection.set_input_focus(
            InputFocus::POINTER_ROOT,
            InputFocus::POINTER_ROOT,
            x11rb::CURRENT_TIME,
        );
        let _ = self
            .connection
            .delete_property(self.root, self.atoms.net_active_window);
        let _ = self.sync();
        info!("sockwm shut down");
    }

    fn next_event(&mut self) -> WmResult<Option<Event>> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }
        Ok(self.connection.poll_for_event()?)
    }

    fn handle_event(&mut self, event: Event) -> WmResult<()> {
        if self.drag != DragState::Idle {
            match event {
                Event::MotionNotify(e) => return self.handle_drag_motion(&e),
                Event::ButtonRelease(e) => return self.finish_drag(&e),
                Event::ConfigureRequest(_) | Event::Expose(_) | Event::MapRequest(_) => {}
                Event::Error(ref e) => return self.handle_x_error(e),
                _ => return Ok(()),
            }
        }

        match event {
            Event::MapRequest(event) => {
                let attrs = match self.connection.get_window_attributes(event.window)?.reply() {
                    Ok(attrs) => attrs,
                    Err(_) => return Ok(()),
                };
                if attrs.override_redirect {
                    return Ok(());
                }
                if !self.registry.contains(event.window) {
                    self.manage_window(event.window)?;
                }
            }
            Event::UnmapNotify(event) => {
                if self.registry.contains(event.window) {
                    let synthetic = event.response_type & 0x80 != 0;
                    if synthetic {
                        self.set_wm_state(event.window, WM_STATE_WITHDRAWN)?;
                    } else {
                        self.unmanage_window(event.window, false)?;
                    }
                }
            }
            Event::DestroyNotify(event) => {
                if self.registry.contains(event.window) {
                    self.unmanage_window(event.window, true)?;
                }
            }
            Event::ConfigureRequest(event) => self.handle_configure_request(&event)?,
            Event::ConfigureNotify(event) => {
                if event.window == self.root {
                    let bar_height = self.bar.height() as i32;
                    let dirty = self.monitor.update_geometry(
                        event.width as i32,
                        event.height as i32,
                        bar_height,
                    );
                    if dirty {
                        self.screen = self.connection.setup().roots[self.screen_number].clone();
                        self.bar.configure(
                            &self.connection,
                            self.display,
                            self.screen_number,
                            self.monitor.bar_y_position,
                            event.width,
                        )?;
                        self.focus(None)?;
                        self.arrange()?;
                    }
                }
            }
            Event::PropertyNotify(event) => self.handle_property_notify(&event)?,
            Event::EnterNotify(event) => {
                let synthetic_crossing = event.mode != NotifyMode::NORMAL
                    || event.detail == NotifyDetail::INFERIOR;
                if synthetic_crossing && event.event != self.root {
                    return Ok(());
                }
                if self.registry.contains(event.event)
                    && self.registry.head_window() != Some(event.event)
                {
                    self.focus(Some(event.event))?;
                }
            }
            Event::Expose(event) => {
                if event.count == 0 && event.window == self.bar.window() {
                    self.draw_bar();
                }
            }
            Event::FocusIn(event) => {
                // Some clients grab focus for themselves; pull it back.
                let head = self
                    .registry
                    .head()
                    .map(|client| (client.window, client.never_focus));
                if let Some((head_window, never_focus)) = head
                    && event.event != head_window
                {
                    self.apply_input_focus(head_window, never_focus)?;
                }
            }
            Event::ButtonPress(event) => self.handle_button_press(&event)?,
            Event::KeyPress(event) => {
                let Some(mapping) = &self.keyboard_mapping else {
                    return Ok(());
                };
                let matched = keyboard::match_binding(&event, &self.config.keybindings, mapping)
                    .map(|(action, arg)| (*action, arg.clone()));
                if let Some((action, arg)) = matched {
                    self.handle_key_action(action, &arg)?;
                }
            }
            Event::MappingNotify(event) => {
                if event.request == Mapping::KEYBOARD {
                    self.refresh_keyboard_mapping()?;
                    self.grab_keys()?;
                }
            }
            Event::ClientMessage(event) => {
                if event.type_ == self.atoms.net_active_window
                    && self.registry.contains(event.window)
                    && self.registry.head_window() != Some(event.window)
                {
                    let already_urgent = self
                        .registry
                        .find(event.window)
                        .is_some_and(|client| client.is_urgent);
                    if !already_urgent {
                        self.set_urgent(event.window, true)?;
                    }
                }
            }
            Event::Error(e) => self.handle_x_error(&e)?,
            _ => {}
        }
        Ok(())
    }

    /// The display server's error channel. A fixed set of (error, request)
    /// pairs is expected from races against concurrently destroyed windows
    /// and is silently dropped; anything else is fatal.
    fn handle_x_error(&self, e: &x11rb::x11_utils::X11Error) -> WmResult<()> {
        let benign = matches!(
            (e.error_kind, e.major_opcode),
            (ErrorKind::Window, _)
                | (ErrorKind::Match, SET_INPUT_FOCUS_REQUEST)
                | (ErrorKind::Match, CONFIGURE_WINDOW_REQUEST)
                | (ErrorKind::Access, GRAB_BUTTON_REQUEST)
                | (ErrorKind::Access, GRAB_KEY_REQUEST)
                | (ErrorKind::Drawable, COPY_AREA_REQUEST)
                | (ErrorKind::Drawable, POLY_FILL_RECTANGLE_REQUEST)
                | (ErrorKind::Drawable, POLY_SEGMENT_REQUEST)
                | (ErrorKind::Drawable, POLY_TEXT8_REQUEST)
        );

        if benign {
            debug!(
                "ignoring expected X error {:?} for request {}",
                e.error_kind, e.major_opcode
            );
            return Ok(());
        }

        error!(
            "fatal X error {:?}: request={} minor={} bad_value={}",
            e.error_kind, e.major_opcode, e.minor_opcode, e.bad_value
        );
        Err(WmError::FatalXError(format!(
            "error {:?} on request {}",
            e.error_kind, e.major_opcode
        )))
    }

    fn handle_configure_request(&mut self, event: &ConfigureRequestEvent) -> WmResult<()> {
        if self.registry.contains(event.window) {
            let is_floating = self
                .registry
                .find(event.window)
                .is_some_and(|client| client.is_floating);

            if event.value_mask.contains(ConfigWindow::BORDER_WIDTH) {
                if let Some(client) = self.registry.find_mut(event.window) {
                    client.border_width = event.border_width;
                }
            } else if is_floating {
                // A floating client's request is taken at face value, then
                // clamped to keep the window reachable.
                let monitor = &self.monitor;
                let (mut x, mut y, mut w, mut h, total_width, total_height) = {
                    let client = self.registry.find_mut(event.window).unwrap();
                    if event.value_mask.contains(ConfigWindow::X) {
                        client.old_x_position = client.x_position;
                        client.x_position = (monitor.screen_x + event.x as i32) as i16;
                    }
                    if event.value_mask.contains(ConfigWindow::Y) {
                        client.old_y_position = client.y_position;
                        client.y_position = (monitor.screen_y + event.y as i32) as i16;
                    }
                    if event.value_mask.contains(ConfigWindow::WIDTH) {
                        client.old_width = client.width;
                        client.width = event.width;
                    }
                    if event.value_mask.contains(ConfigWindow::HEIGHT) {
                        client.old_height = client.height;
                        client.height = event.height;
                    }
                    (
                        client.x_position as i32,
                        client.y_position as i32,
                        client.width as i32,
                        client.height as i32,
                        client.total_width(),
                        client.total_height(),
                    )
                };

                if x + w > self.monitor.screen_x + self.monitor.screen_width {
                    // Oversized requests get centered instead of clipped.
                    x = self.monitor.screen_x
                        + (self.monitor.screen_width / 2 - total_width / 2);
                }
                if y + h > self.monitor.screen_y + self.monitor.screen_height {
                    y = self.monitor.screen_y
                        + (self.monitor.screen_height / 2 - total_height / 2);
                }
                if let Some(client) = self.registry.find_mut(event.window) {
                    client.x_position = x as i16;
                    client.y_position = y as i16;
                    w = client.width as i32;
                    h = client.height as i32;
                }

                let moved_only = event
                    .value_mask
                    .intersects(ConfigWindow::X | ConfigWindow::Y)
                    && !event
                        .value_mask
                        .intersects(ConfigWindow::WIDTH | ConfigWindow::HEIGHT);
                if moved_only {
                    self.send_configure_notify(event.window)?;
                }

                self.connection.configure_window(
                    event.window,
                    &ConfigureWindowAux::new()
                        .x(x)
                        .y(y)
                        .width(w as u32)
                        .height(h as u32),
                )?;
            } else {
                // Tiled geometry is policy-owned; the client only gets a
                // synthetic notify restating what it has.
                self.send_configure_notify(event.window)?;
            }
        } else {
            // Not ours: forward untouched for protocol compliance.
            let mut aux = ConfigureWindowAux::new();
            if event.value_mask.contains(ConfigWindow::X) {
                aux = aux.x(event.x as i32);
            }
            if event.value_mask.contains(ConfigWindow::Y) {
                aux = aux.y(event.y as i32);
            }
            if event.value_mask.contains(ConfigWindow::WIDTH) {
                aux = aux.width(event.width as u32);
            }
            if event.value_mask.contains(ConfigWindow::HEIGHT) {
                aux = aux.height(event.height as u32);
            }
            if event.value_mask.contains(ConfigWindow::BORDER_WIDTH) {
                aux = aux.border_width(event.border_width as u32);
            }
            if event.value_mask.contains(ConfigWindow::SIBLING) {
                aux = aux.sibling(event.sibling);
            }
            if event.value_mask.contains(ConfigWindow::STACK_MODE) {
                aux = aux.stack_mode(event.stack_mode);
            }
            self.connection.configure_window(event.window, &aux)?;
        }
        self.connection.flush()?;
        Ok(())
    }

    fn handle_property_notify(&mut self, event: &PropertyNotifyEvent) -> WmResult<()> {
        if event.window == self.root && event.atom == self.atoms.wm_name {
            self.update_status()?;
            return Ok(());
        }
        if event.state == Property::DELETE || !self.registry.contains(event.window) {
            return Ok(());
        }

        if event.atom == u32::from(AtomEnum::WM_TRANSIENT_FOR) {
            let is_floating = self
                .registry
                .find(event.window)
                .is_some_and(|client| client.is_floating);
            if !is_floating
                && let Some(parent) = self.transient_parent(event.window)
                && self.registry.contains(parent)
            {
                if let Some(client) = self.registry.find_mut(event.window) {
                    client.is_floating = true;
                }
                self.arrange()?;
            }
        } else if event.atom == u32::from(AtomEnum::WM_NORMAL_HINTS) {
            if let Some(client) = self.registry.find_mut(event.window) {
                client.hints_valid = false;
            }
        } else if event.atom == u32::from(AtomEnum::WM_HINTS) {
            self.update_window_hints(event.window)?;
            self.draw_bar();
        }

        if event.atom == self.atoms.wm_name || event.atom == self.atoms.net_wm_name {
            self.update_window_title(event.window)?;
            if self.registry.head_window() == Some(event.window) {
                self.draw_bar();
            }
        }

        if event.atom == self.atoms.net_wm_window_type {
            self.update_window_type(event.window)?;
        }
        Ok(())
    }

    fn handle_button_press(&mut self, event: &ButtonPressEvent) -> WmResult<()> {
        if event.event == self.bar.window() {
            if self.bar.handle_click(event.event_x) == BarClick::Status
                && event.detail == u8::from(ButtonIndex::M2)
            {
                signal::spawn_detached(&self.config.terminal);
            }
            return Ok(());
        }

        if !self.registry.contains(event.event) {
            return Ok(());
        }

        self.focus(Some(event.event))?;
        self.arrange()?;
        self.connection
            .allow_events(Allow::REPLAY_POINTER, event.time)?;

        let modkey_held =
            keyboard::clean_mask(event.state) & u16::from(self.config.modkey) != 0;
        if !modkey_held {
            return Ok(());
        }

        if event.detail == u8::from(ButtonIndex::M1) {
            self.begin_move(event.event)?;
        } else if event.detail == u8::from(ButtonIndex::M2) {
            self.toggle_floating()?;
        } else if event.detail == u8::from(ButtonIndex::M3) {
            self.begin_resize(event.event)?;
        }
        Ok(())
    }

    fn begin_move(&mut self, window: Window) -> WmResult<()> {
        let Some(client) = self.registry.find(window) else {
            return Ok(());
        };
        let (orig_x, orig_y, is_floating) =
            (client.x_position, client.y_position, client.is_floating);

        if !is_floating {
            self.toggle_floating()?;
        }

        let grab = self
            .connection
            .grab_pointer(
                false,
                self.root,
                EventMask::POINTER_MOTION | EventMask::BUTTON_RELEASE | EventMask::BUTTON_PRESS,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                self.cursors.moving,
                x11rb::CURRENT_TIME,
            )?
            .reply()?;
        if grab.status != GrabStatus::SUCCESS {
            return Ok(());
        }

        let pointer = self.connection.query_pointer(self.root)?.reply()?;
        self.drag = DragState::Moving {
            window,
            start_root_x: pointer.root_x,
            start_root_y: pointer.root_y,
            orig_x,
            orig_y,
            last_motion: 0,
        };
        Ok(())
    }

    fn begin_resize(&mut self, window: Window) -> WmResult<()> {
        let Some(client) = self.registry.find(window) else {
            return Ok(());
        };
        let (orig_x, orig_y, width, height, border_width, is_floating) = (
            client.x_position,
            client.y_position,
            client.width,
            client.height,
            client.border_width,
            client.is_floating,
        );

        if !is_floating {
            self.toggle_floating()?;
        }

        let grab = self
            .connection
            .grab_pointer(
                false,
                self.root,
                EventMask::POINTER_MOTION | EventMask::BUTTON_RELEASE | EventMask::BUTTON_PRESS,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                self.cursors.resizing,
                x11rb::CURRENT_TIME,
            )?
            .reply()?;
        if grab.status != GrabStatus::SUCCESS {
            return Ok(());
        }

        // Park the pointer on the bottom-right corner so the resize feels
        // anchored there.
        self.connection.warp_pointer(
            x11rb::NONE,
            window,
            0,
            0,
            0,
            0,
            (width + border_width - 1) as i16,
            (height + border_width - 1) as i16,
        )?;

        self.drag = DragState::Resizing {
            window,
            orig_x,
            orig_y,
            last_motion: 0,
        };
        Ok(())
    }

    fn handle_drag_motion(&mut self, event: &MotionNotifyEvent) -> WmResult<()> {
        match self.drag {
            DragState::Moving {
                window,
                start_root_x,
                start_root_y,
                orig_x,
                orig_y,
                last_motion,
            } => {
                if event.time.wrapping_sub(last_motion) <= MOTION_THROTTLE_MS {
                    return Ok(());
                }
                self.drag = DragState::Moving {
                    window,
                    start_root_x,
                    start_root_y,
                    orig_x,
                    orig_y,
                    last_motion: event.time,
                };

                let Some(client) = self.registry.find(window) else {
                    return Ok(());
                };
                let (width, height, total_width, total_height) = (
                    client.width as i32,
                    client.height as i32,
                    client.total_width(),
                    client.total_height(),
                );

                let mut new_x = orig_x as i32 + (event.root_x as i32 - start_root_x as i32);
                let mut new_y = orig_y as i32 + (event.root_y as i32 - start_root_y as i32);

                let snap = self.config.snap;
                let monitor = &self.monitor;
                if (monitor.window_area_x - new_x).abs() < snap {
                    new_x = monitor.window_area_x;
                } else if ((monitor.window_area_x + monitor.window_area_width)
                    - (new_x + total_width))
                    .abs()
                    < snap
                {
                    new_x = monitor.window_area_x + monitor.window_area_width - total_width;
                }
                if (monitor.window_area_y - new_y).abs() < snap {
                    new_y = monitor.window_area_y;
                } else if ((monitor.window_area_y + monitor.window_area_height)
                    - (new_y + total_height))
                    .abs()
                    < snap
                {
                    new_y = monitor.window_area_y + monitor.window_area_height - total_height;
                }

                self.resize(
                    window,
                    Bounds {
                        x: new_x,
                        y: new_y,
                        width,
                        height,
                    },
                    true,
                )?;
                self.connection.flush()?;
            }
            DragState::Resizing {
                window,
                orig_x,
                orig_y,
                last_motion,
            } => {
                if event.time.wrapping_sub(last_motion) <= MOTION_THROTTLE_MS {
                    return Ok(());
                }
                self.drag = DragState::Resizing {
                    window,
                    orig_x,
                    orig_y,
                    last_motion: event.time,
                };

                let Some(client) = self.registry.find(window) else {
                    return Ok(());
                };
                let border_width = client.border_width as i32;

                let new_width =
                    (event.root_x as i32 - orig_x as i32 - 2 * border_width + 1).max(1);
                let new_height =
                    (event.root_y as i32 - orig_y as i32 - 2 * border_width + 1).max(1);

                self.resize(
                    window,
                    Bounds {
                        x: orig_x as i32,
                        y: orig_y as i32,
                        width: new_width,
                        height: new_height,
                    },
                    true,
                )?;
                self.connection.flush()?;
            }
            DragState::Idle => {}
        }
        Ok(())
    }

    fn finish_drag(&mut self, _event: &ButtonReleaseEvent) -> WmResult<()> {
        if let DragState::Resizing { window, .. } = self.drag
            && let Some(client) = self.registry.find(window)
        {
            let (width, height, border_width) =
                (client.width, client.height, client.border_width);
            self.connection.warp_pointer(
                x11rb::NONE,
                window,
                0,
                0,
                0,
                0,
                (width + border_width - 1) as i16,
                (height + border_width - 1) as i16,
            )?;
        }

        self.drag = DragState::Idle;
        self.connection.ungrab_pointer(x11rb::CURRENT_TIME)?;
        self.drain_enter_notifications()?;
        Ok(())
    }

    fn handle_key_action(&mut self, action: KeyAction, arg: &Arg) -> WmResult<()> {
        match action {
            KeyAction::Spawn => handlers::handle_spawn_action(arg),
            KeyAction::SpawnTerminal => signal::spawn_detached(&self.config.terminal),
            KeyAction::KillClient => self.kill_client()?,
            KeyAction::ToggleBar => self.toggle_bar()?,
            KeyAction::ToggleFloating => self.toggle_floating()?,
            KeyAction::Quit => {
                info!("quit requested via keybinding");
                self.running = false;
            }
            KeyAction::None => {}
        }
        Ok(())
    }

    /// One accepted connection, one framed request, at most one response,
    /// then the connection closes — all synchronously within this loop
    /// iteration. The peer is local and trusted.
    fn dispatch_control_event(&mut self) -> WmResult<()> {
        let Some(mut stream) = self.control.accept() else {
            return Ok(());
        };
        let Some(raw) = control::read_request(&mut stream) else {
            return Ok(());
        };
        let Some((command, payload)) = control::parse_request(&raw) else {
            debug!("control: dropping unrecognized request");
            return Ok(());
        };

        match command {
            Command::GetClients => {
                let response = control::format_client_list(
                    self.registry.iter().map(|client| client.name.as_str()),
                );
                control::write_response(&mut stream, response.as_bytes());
            }
            Command::SelectClient => {
                let index = payload.and_then(control::parse_select_index);
                let window = index.and_then(|i| self.registry.get(i)).map(|c| c.window);
                if let Some(window) = window {
                    self.focus(Some(window))?;
                    self.arrange()?;
                    if let Some(client) = self.registry.find(window) {
                        let title = client.name.clone();
                        control::write_response(&mut stream, title.as_bytes());
                    }
                } else {
                    debug!("control: select index {payload:?} out of range or malformed");
                }
            }
            Command::StateDump => {
                let snapshot = StateSnapshot::capture(&self.registry, &self.monitor);
                match serde_json::to_vec(&snapshot) {
                    Ok(json) => control::write_response(&mut stream, &json),
                    Err(e) => warn!("control: failed to serialize state dump: {e}"),
                }
            }
            Command::Quit => {
                info!("quit requested via control socket");
                self.running = false;
            }
        }
        Ok(())
    }

    fn manage_window(&mut self, window: Window) -> WmResult<()> {
        let geometry = self.connection.get_geometry(window)?.reply()?;

        let mut client = Client::new(window);
        client.x_position = geometry.x;
        client.y_position = geometry.y;
        client.width = geometry.width;
        client.height = geometry.height;
        client.save_bounds();
        client.old_border_width = geometry.border_width;
        client.border_width = self.config.border_width as u16;

        if let Some(title) = self.read_window_title(window)? {
            client.set_title(&title);
        } else {
            client.set_title("");
        }

        let transient_parent = self
            .transient_parent(window)
            .filter(|parent| self.registry.contains(*parent));
        if transient_parent.is_some() {
            client.is_floating = true;
        } else {
            self.apply_rules(&mut client)?;
        }

        // Keep the starting position inside the work area.
        let monitor = &self.monitor;
        let mut x = client.x_position as i32;
        let mut y = client.y_position as i32;
        if x + client.total_width() > monitor.window_area_x + monitor.window_area_width {
            x = monitor.window_area_x + monitor.window_area_width - client.total_width();
        }
        if y + client.total_height() > monitor.window_area_y + monitor.window_area_height {
            y = monitor.window_area_y + monitor.window_area_height - client.total_height();
        }
        client.x_position = x.max(monitor.window_area_x) as i16;
        client.y_position = y.max(monitor.window_area_y) as i16;

        self.connection.configure_window(
            window,
            &ConfigureWindowAux::new().border_width(self.config.border_width),
        )?;
        self.connection.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().border_pixel(self.config.border_unfocused),
        )?;

        debug!("managing window {window} ({})", client.name);
        self.registry.attach(client);

        self.send_configure_notify(window)?;
        self.update_window_type(window)?;
        self.update_size_hints(window)?;
        self.update_window_hints(window)?;

        self.connection.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::ENTER_WINDOW
                    | EventMask::FOCUS_CHANGE
                    | EventMask::PROPERTY_CHANGE
                    | EventMask::STRUCTURE_NOTIFY,
            ),
        )?;
        self.grab_buttons(window, false)?;

        let is_floating = {
            let client = self.registry.find_mut(window).unwrap();
            if !client.is_floating {
                client.is_floating = client.is_fixed;
            }
            client.is_floating
        };
        if is_floating {
            self.connection.configure_window(
                window,
                &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
            )?;
        }

        self.connection.change_property(
            PropMode::APPEND,
            self.root,
            self.atoms.net_client_list,
            AtomEnum::WINDOW,
            32,
            1,
            &window.to_ne_bytes(),
        )?;

        // Park the window off-screen until arrange places it; some clients
        // need the move to pick up their initial geometry.
        let (x, y, w, h) = {
            let client = self.registry.find(window).unwrap();
            (
                client.x_position as i32,
                client.y_position as i32,
                client.width as u32,
                client.height as u32,
            )
        };
        self.connection.configure_window(
            window,
            &ConfigureWindowAux::new()
                .x(x + 2 * self.screen.width_in_pixels as i32)
                .y(y)
                .width(w)
                .height(h),
        )?;

        self.set_wm_state(window, WM_STATE_NORMAL)?;
        self.focus(None)?;
        self.arrange()?;
        self.connection.map_window(window)?;
        self.connection.flush()?;
        Ok(())
    }

    fn unmanage_window(&mut self, window: Window, destroyed: bool) -> WmResult<()> {
        let Some(client) = self.registry.detach(window) else {
            return Ok(());
        };
        debug!("unmanaging window {window} ({})", client.name);

        if !destroyed {
            // The window outlives us; put it back the way we found it.
            self.connection.grab_server()?;
            self.connection.change_window_attributes(
                window,
                &ChangeWindowAttributesAux::new().event_mask(EventMask::NO_EVENT),
            )?;
            self.connection.configure_window(
                window,
                &ConfigureWindowAux::new().border_width(client.old_border_width as u32),
            )?;
            self.connection
                .ungrab_button(ButtonIndex::ANY, window, ModMask::ANY)?;
            self.set_wm_state(window, WM_STATE_WITHDRAWN)?;
            self.sync()?;
            self.connection.ungrab_server()?;
        }

        self.update_client_list()?;
        self.focus(None)?;
        self.arrange()?;
        Ok(())
    }

    /// Focus is the head of the registry. Focusing something else reorders
    /// the registry so the invariant "focused == head" cannot drift.
    fn focus(&mut self, window: Option<Window>) -> WmResult<()> {
        let target = window
            .filter(|w| self.registry.contains(*w))
            .or_else(|| self.registry.head_window());

        let Some(target) = target else {
            // Nothing to focus: input reverts to the root and the active
            // marker is cleared.
            self.connection.set_input_focus(
                InputFocus::POINTER_ROOT,
                InputFocus::POINTER_ROOT,
                x11rb::CURRENT_TIME,
            )?;
            self.connection
                .delete_property(self.root, self.atoms.net_active_window)?;
            self.draw_bar();
            self.connection.flush()?;
            return Ok(());
        };

        let old_head = self.registry.head_window();
        if old_head != Some(target) {
            if let Some(old_window) = old_head {
                self.unfocus(old_window)?;
            }
            self.registry.move_to_head(target);
        }

        let (is_urgent, never_focus) = {
            let client = self.registry.find(target).unwrap();
            (client.is_urgent, client.never_focus)
        };

        if is_urgent {
            self.set_urgent(target, false)?;
        }
        self.grab_buttons(target, true)?;
        self.connection.change_window_attributes(
            target,
            &ChangeWindowAttributesAux::new().border_pixel(self.config.border_focused),
        )?;
        self.apply_input_focus(target, never_focus)?;

        self.draw_bar();
        self.connection.flush()?;
        Ok(())
    }

    fn unfocus(&self, window: Window) -> WmResult<()> {
        self.grab_buttons(window, false)?;
        self.connection.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().border_pixel(self.config.border_unfocused),
        )?;
        Ok(())
    }

    fn apply_input_focus(&self, window: Window, never_focus: bool) -> WmResult<()> {
        if !never_focus {
            self.connection
                .set_input_focus(InputFocus::POINTER_ROOT, window, x11rb::CURRENT_TIME)?;
            self.connection.change_property(
                PropMode::REPLACE,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                32,
                1,
                &window.to_ne_bytes(),
            )?;
        }
        let _ = self.send_protocol_event(window, self.atoms.wm_take_focus)?;
        Ok(())
    }

    /// Recompute tiled geometry and server stacking. The stable partition
    /// here is the authoritative restore of the floating-before-tiled
    /// ordering. Tiled clients all get the full work area; the stacking
    /// order decides which one shows. The head stacks on top, every later
    /// client directly below its predecessor, the bar beneath everything.
    fn arrange(&mut self) -> WmResult<()> {
        self.draw_bar();
        if self.registry.is_empty() {
            return Ok(());
        }

        self.registry.partition_floating_first();

        let monitor = &self.monitor;
        let work_area = (
            monitor.window_area_x,
            monitor.window_area_y,
            monitor.window_area_width,
            monitor.window_area_height,
        );
        let tiled: Vec<(Window, i32)> = self
            .registry
            .tiled()
            .map(|client| (client.window, client.border_width as i32))
            .collect();
        for (window, border_width) in tiled {
            self.resize(
                window,
                Bounds {
                    x: work_area.0,
                    y: work_area.1,
                    width: work_area.2 - 2 * border_width,
                    height: work_area.3 - 2 * border_width,
                },
                false,
            )?;
        }

        let mut previous: Option<Window> = None;
        for window in self.registry.windows() {
            match previous {
                None => {
                    self.connection.configure_window(
                        window,
                        &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
                    )?;
                }
                Some(sibling) => {
                    self.connection.configure_window(
                        window,
                        &ConfigureWindowAux::new()
                            .sibling(sibling)
                            .stack_mode(StackMode::BELOW),
                    )?;
                }
            }
            previous = Some(window);
        }
        self.connection.configure_window(
            self.bar.window(),
            &ConfigureWindowAux::new().stack_mode(StackMode::BELOW),
        )?;

        self.drain_enter_notifications()?;
        Ok(())
    }

    /// Geometry changes spray EnterNotify at whatever ends up under the
    /// pointer; drop them so arranging does not steal focus. Anything else
    /// that arrives during the sync is parked for the main loop.
    fn drain_enter_notifications(&mut self) -> WmResult<()> {
        self.sync()?;
        while let Some(event) = self.connection.poll_for_event()? {
            match event {
                Event::EnterNotify(_) => {}
                other => self.pending_events.push_back(other),
            }
        }
        Ok(())
    }

    /// Run requested bounds through the resolver and push the result to the
    /// server if anything changed.
    fn resize(&mut self, window: Window, requested: Bounds, interactive: bool) -> WmResult<()> {
        let apply_hints = {
            let Some(client) = self.registry.find(window) else {
                return Ok(());
            };
            client.is_floating || self.config.respect_resize_hints
        };

        if apply_hints {
            let hints_valid = self
                .registry
                .find(window)
                .is_some_and(|client| client.hints_valid);
            if !hints_valid {
                self.update_size_hints(window)?;
            }
        }

        let (resolved, changed) = {
            let client = self.registry.find(window).unwrap();
            let resolved = resolve(
                requested,
                client.border_width as i32,
                &client.hints,
                &self.monitor,
                self.bar.height() as i32,
                interactive,
                apply_hints,
            );
            let changed = resolved.x != client.x_position as i32
                || resolved.y != client.y_position as i32
                || resolved.width != client.width as i32
                || resolved.height != client.height as i32;
            (resolved, changed)
        };

        if changed {
            self.resize_client(window, resolved)?;
        }
        Ok(())
    }

    fn resize_client(&mut self, window: Window, bounds: Bounds) -> WmResult<()> {
        let border_width = {
            let client = self.registry.find_mut(window).unwrap();
            client.save_bounds();
            client.x_position = bounds.x as i16;
            client.y_position = bounds.y as i16;
            client.width = bounds.width as u16;
            client.height = bounds.height as u16;
            client.border_width as u32
        };

        self.connection.configure_window(
            window,
            &ConfigureWindowAux::new()
                .x(bounds.x)
                .y(bounds.y)
                .width(bounds.width as u32)
                .height(bounds.height as u32)
                .border_width(border_width),
        )?;
        self.send_configure_notify(window)?;
        self.connection.flush()?;
        Ok(())
    }

    fn send_configure_notify(&self, window: Window) -> WmResult<()> {
        let Some(client) = self.registry.find(window) else {
            return Ok(());
        };

        let event = ConfigureNotifyEvent {
            response_type: CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: window,
            window,
            above_sibling: x11rb::NONE,
            x: client.x_position,
            y: client.y_position,
            width: client.width,
            height: client.height,
            border_width: client.border_width,
            override_redirect: false,
        };
        self.connection
            .send_event(false, window, EventMask::STRUCTURE_NOTIFY, event)?;
        Ok(())
    }

    fn toggle_bar(&mut self) -> WmResult<()> {
        self.monitor.show_bar = !self.monitor.show_bar;
        let bar_height = self.bar.height() as i32;
        self.monitor.update_bar_position(bar_height);
        self.bar.configure(
            &self.connection,
            self.display,
            self.screen_number,
            self.monitor.bar_y_position,
            self.monitor.screen_width as u16,
        )?;
        self.arrange()?;
        Ok(())
    }

    fn toggle_floating(&mut self) -> WmResult<()> {
        let Some(head) = self.registry.head_mut() else {
            return Ok(());
        };
        head.is_floating = !head.is_floating || head.is_fixed;
        let (window, bounds, is_floating) = (
            head.window,
            Bounds {
                x: head.x_position as i32,
                y: head.y_position as i32,
                width: head.width as i32,
                height: head.height as i32,
            },
            head.is_floating,
        );

        if is_floating {
            // Re-resolve the same bounds so hints apply again.
            self.resize(window, bounds, false)?;
        }
        self.arrange()?;
        Ok(())
    }

    fn kill_client(&mut self) -> WmResult<()> {
        let Some(window) = self.registry.head_window() else {
            return Ok(());
        };

        if !self.send_protocol_event(window, self.atoms.wm_delete_window)? {
            // No WM_DELETE_WINDOW support; pull the plug server-side.
            self.connection.grab_server()?;
            self.connection
                .set_close_down_mode(CloseDown::DESTROY_ALL)?;
            self.connection.kill_client(window)?;
            self.sync()?;
            self.connection.ungrab_server()?;
        }
        Ok(())
    }

    fn send_protocol_event(&self, window: Window, protocol: Atom) -> WmResult<bool> {
        let protocols = self
            .connection
            .get_property(
                false,
                window,
                self.atoms.wm_protocols,
                AtomEnum::ATOM,
                0,
                32,
            )?
            .reply();

        let supported = match protocols {
            Ok(reply) => reply
                .value32()
                .map(|atoms| atoms.into_iter().any(|atom| atom == protocol))
                .unwrap_or(false),
            Err(_) => false,
        };

        if supported {
            let event = ClientMessageEvent {
                response_type: CLIENT_MESSAGE_EVENT,
                format: 32,
                sequence: 0,
                window,
                type_: self.atoms.wm_protocols,
                data: ClientMessageData::from([protocol, x11rb::CURRENT_TIME, 0, 0, 0]),
            };
            self.connection
                .send_event(false, window, EventMask::NO_EVENT, event)?;
        }
        Ok(supported)
    }

    fn grab_buttons(&self, window: Window, focused: bool) -> WmResult<()> {
        self.connection
            .ungrab_button(ButtonIndex::ANY, window, ModMask::ANY)?;

        // Unfocused clients get a catch-all sync grab so the first click
        // focuses them before being replayed to the application.
        if !focused {
            self.connection.grab_button(
                false,
                window,
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
                GrabMode::SYNC,
                GrabMode::SYNC,
                x11rb::NONE,
                x11rb::NONE,
                ButtonIndex::ANY,
                ModMask::ANY,
            )?;
        }

        let ignore_modifiers = [
            0u16,
            u16::from(ModMask::LOCK),
            u16::from(ModMask::M2),
            u16::from(ModMask::LOCK | ModMask::M2),
        ];
        for &ignore_mask in &ignore_modifiers {
            let grab_mask = u16::from(self.config.modkey) | ignore_mask;
            for button in [ButtonIndex::M1, ButtonIndex::M2, ButtonIndex::M3] {
                self.connection.grab_button(
                    false,
                    window,
                    EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
                    GrabMode::ASYNC,
                    GrabMode::SYNC,
                    x11rb::NONE,
                    x11rb::NONE,
                    button,
                    grab_mask.into(),
                )?;
            }
        }
        Ok(())
    }

    fn grab_keys(&mut self) -> WmResult<()> {
        let Some(mapping) = &self.keyboard_mapping else {
            return Ok(());
        };

        self.connection
            .ungrab_key(Grab::ANY, self.root, ModMask::ANY)?;

        let setup = self.connection.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);

        let ignore_modifiers = [
            0u16,
            u16::from(ModMask::LOCK),
            u16::from(ModMask::M2),
            u16::from(ModMask::LOCK | ModMask::M2),
        ];
        for binding in &self.config.keybindings {
            let Some(keycode) = mapping.find_keycode(binding.keysym(), min_keycode, max_keycode)
            else {
                warn!("no keycode for binding {binding:?}");
                continue;
            };
            for &ignore_mask in &ignore_modifiers {
                let grab_mask = modifiers_to_mask(&binding.modifiers) | ignore_mask;
                self.connection.grab_key(
                    true,
                    self.root,
                    grab_mask.into(),
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )?;
            }
        }
        Ok(())
    }

    fn refresh_keyboard_mapping(&mut self) -> WmResult<()> {
        let setup = self.connection.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);
        let reply = self
            .connection
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;

        self.keyboard_mapping = Some(KeyboardMapping {
            syms: reply.keysyms,
            keysyms_per_keycode: reply.keysyms_per_keycode,
            min_keycode,
        });
        Ok(())
    }

    /// Adopt windows that were already mapped (or iconified) before we
    /// started; transients in a second pass so their parents exist first.
    fn scan_existing_windows(&mut self) -> WmResult<()> {
        let tree = self.connection.query_tree(self.root)?.reply()?;

        let mut transients = Vec::new();
        for &window in &tree.children {
            if window == self.bar.window() || window == self.wm_check_window {
                continue;
            }
            let Ok(attrs) = self.connection.get_window_attributes(window)?.reply() else {
                continue;
            };
            if attrs.override_redirect {
                continue;
            }
            if self.transient_parent(window).is_some() {
                transients.push(window);
                continue;
            }
            if attrs.map_state == MapState::VIEWABLE
                || self.get_wm_state(window) == Some(WM_STATE_ICONIC)
            {
                self.manage_window(window)?;
            }
        }

        for window in transients {
            let Ok(attrs) = self.connection.get_window_attributes(window)?.reply() else {
                continue;
            };
            if attrs.map_state == MapState::VIEWABLE
                || self.get_wm_state(window) == Some(WM_STATE_ICONIC)
            {
                self.manage_window(window)?;
            }
        }
        Ok(())
    }

    fn apply_rules(&self, client: &mut Client) -> WmResult<()> {
        let class_property = self
            .connection
            .get_property(
                false,
                client.window,
                AtomEnum::WM_CLASS,
                AtomEnum::STRING,
                0,
                1024,
            )?
            .reply();

        let (instance, class) = match class_property {
            Ok(reply) if !reply.value.is_empty() => {
                let mut parts = reply.value.split(|&byte| byte == 0);
                let instance = String::from_utf8_lossy(parts.next().unwrap_or(b"")).into_owned();
                let class = String::from_utf8_lossy(parts.next().unwrap_or(b"")).into_owned();
                (instance, class)
            }
            _ => (String::new(), String::new()),
        };

        for rule in &self.config.window_rules {
            if rule.matches(&class, &instance, &client.name) {
                client.is_floating = rule.is_floating;
            }
        }
        Ok(())
    }

    fn transient_parent(&self, window: Window) -> Option<Window> {
        let reply = self
            .connection
            .get_property(
                false,
                window,
                AtomEnum::WM_TRANSIENT_FOR,
                AtomEnum::WINDOW,
                0,
                1,
            )
            .ok()?
            .reply()
            .ok()?;
        reply.value32()?.next().filter(|&parent| parent != 0)
    }

    fn get_wm_state(&self, window: Window) -> Option<u32> {
        let reply = self
            .connection
            .get_property(false, window, self.atoms.wm_state, self.atoms.wm_state, 0, 2)
            .ok()?
            .reply()
            .ok()?;
        reply.value32()?.next()
    }

    fn set_wm_state(&self, window: Window, state: u32) -> WmResult<()> {
        let data = [state, 0u32];
        let bytes: Vec<u8> = data.iter().flat_map(|value| value.to_ne_bytes()).collect();
        self.connection.change_property(
            PropMode::REPLACE,
            window,
            self.atoms.wm_state,
            self.atoms.wm_state,
            32,
            2,
            &bytes,
        )?;
        Ok(())
    }

    fn update_client_list(&self) -> WmResult<()> {
        let window_bytes: Vec<u8> = self
            .registry
            .iter()
            .flat_map(|client| client.window.to_ne_bytes())
            .collect();
        self.connection.change_property(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_client_list,
            AtomEnum::WINDOW,
            32,
            self.registry.len() as u32,
            &window_bytes,
        )?;
        Ok(())
    }

    fn read_window_title(&self, window: Window) -> WmResult<Option<String>> {
        let net_name = self
            .connection
            .get_property(
                false,
                window,
                self.atoms.net_wm_name,
                self.atoms.utf8_string,
                0,
                256,
            )
            .ok()
            .and_then(|cookie| cookie.reply().ok());
        if let Some(reply) = net_name
            && !reply.value.is_empty()
        {
            return Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()));
        }

        let wm_name = self
            .connection
            .get_property(false, window, self.atoms.wm_name, AtomEnum::ANY, 0, 256)?
            .reply();
        if let Ok(reply) = wm_name
            && !reply.value.is_empty()
        {
            return Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()));
        }
        Ok(None)
    }

    fn update_window_title(&mut self, window: Window) -> WmResult<()> {
        let title = self.read_window_title(window)?;
        if let Some(client) = self.registry.find_mut(window) {
            client.set_title(title.as_deref().unwrap_or(""));
        }
        Ok(())
    }

    /// Root WM_NAME is the status line; external tools update it with
    /// xsetroot and friends.
    fn update_status(&mut self) -> WmResult<()> {
        let status = self
            .read_window_title(self.root)?
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "sockwm".to_string());
        self.status_text = status;
        self.draw_bar();
        Ok(())
    }

    fn update_size_hints(&mut self, window: Window) -> WmResult<()> {
        let reply = self
            .connection
            .get_property(
                false,
                window,
                AtomEnum::WM_NORMAL_HINTS,
                AtomEnum::WM_SIZE_HINTS,
                0,
                WM_SIZE_HINTS_FIELDS as u32,
            )?
            .reply()?;

        if let Some(client) = self.registry.find_mut(window) {
            match SizeHints::parse(&reply.value) {
                Some(hints) => {
                    client.hints = hints;
                    client.is_fixed = hints.is_fixed();
                    client.hints_valid = true;
                }
                None => {
                    client.hints_valid = false;
                }
            }
        }
        Ok(())
    }

    fn update_window_hints(&mut self, window: Window) -> WmResult<()> {
        let reply = self
            .connection
            .get_property(false, window, AtomEnum::WM_HINTS, AtomEnum::WM_HINTS, 0, 9)?
            .reply();
        let Ok(hints) = reply else {
            return Ok(());
        };
        if hints.value.len() < 4 {
            return Ok(());
        }

        let flags = u32::from_ne_bytes([
            hints.value[0],
            hints.value[1],
            hints.value[2],
            hints.value[3],
        ]);

        let is_head = self.registry.head_window() == Some(window);
        if is_head && flags & XURGENCY_HINT != 0 {
            // The focused client is by definition not urgent; clear the
            // hint at the source.
            let mut cleared = hints.value.clone();
            cleared[0..4].copy_from_slice(&(flags & !XURGENCY_HINT).to_ne_bytes());
            self.connection.change_property(
                PropMode::REPLACE,
                window,
                AtomEnum::WM_HINTS,
                AtomEnum::WM_HINTS,
                32,
                (cleared.len() / 4) as u32,
                &cleared,
            )?;
        } else if let Some(client) = self.registry.find_mut(window) {
            client.is_urgent = flags & XURGENCY_HINT != 0;
        }

        let never_focus = if hints.value.len() >= 8 && flags & INPUT_HINT != 0 {
            let input = i32::from_ne_bytes([
                hints.value[4],
                hints.value[5],
                hints.value[6],
                hints.value[7],
            ]);
            input == 0
        } else {
            false
        };
        if let Some(client) = self.registry.find_mut(window) {
            client.never_focus = never_focus;
        }
        Ok(())
    }

    fn update_window_type(&mut self, window: Window) -> WmResult<()> {
        let window_type = self
            .connection
            .get_property(
                false,
                window,
                self.atoms.net_wm_window_type,
                AtomEnum::ATOM,
                0,
                1,
            )?
            .reply();

        let is_dialog = match window_type {
            Ok(reply) => reply
                .value32()
                .and_then(|mut atoms| atoms.next())
                .is_some_and(|atom| atom == self.atoms.net_wm_window_type_dialog),
            Err(_) => false,
        };

        if is_dialog && let Some(client) = self.registry.find_mut(window) {
            client.is_floating = true;
        }
        Ok(())
    }

    fn set_urgent(&mut self, window: Window, urgent: bool) -> WmResult<()> {
        if let Some(client) = self.registry.find_mut(window) {
            client.is_urgent = urgent;
        }

        let reply = self
            .connection
            .get_property(false, window, AtomEnum::WM_HINTS, AtomEnum::WM_HINTS, 0, 9)?
            .reply();
        let Ok(hints) = reply else {
            return Ok(());
        };
        if hints.value.len() < 4 {
            return Ok(());
        }

        let flags = u32::from_ne_bytes([
            hints.value[0],
            hints.value[1],
            hints.value[2],
            hints.value[3],
        ]);
        let new_flags = if urgent {
            flags | XURGENCY_HINT
        } else {
            flags & !XURGENCY_HINT
        };
        let mut value = hints.value.clone();
        value[0..4].copy_from_slice(&new_flags.to_ne_bytes());
        self.connection.change_property(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_HINTS,
            AtomEnum::WM_HINTS,
            32,
            (value.len() / 4) as u32,
            &value,
        )?;
        Ok(())
    }

    fn draw_bar(&mut self) {
        if !self.monitor.show_bar {
            return;
        }
        let head = self
            .registry
            .head()
            .map(|client| (client.name.clone(), client.is_floating, client.is_fixed));
        self.bar.invalidate();
        self.bar.draw(
            &self.font,
            head.as_ref()
                .map(|(name, floating, fixed)| (name.as_str(), *floating, *fixed)),
            &self.status_text,
        );
    }

    /// Full round trip: everything we sent has been processed and every
    /// resulting event is in our queue.
    fn sync(&self) -> WmResult<()> {
        self.connection.flush()?;
        self.connection.get_input_focus()?.reply()?;
        Ok(())
    }

    fn run_autostart_commands(&self) {
        for command in &self.config.autostart {
            signal::spawn_detached(command);
            debug!("autostart: spawned {command}");
        }
    }
}
