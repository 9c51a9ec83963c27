use x11rb::protocol::xproto::Window;

use crate::size_hints::SizeHints;

/// Display titles are stored with a fixed upper bound.
pub const MAX_TITLE_BYTES: usize = 255;

/// Placeholder for clients that never set a usable title.
pub const BROKEN_TITLE: &str = "broken";

/// One managed top-level window. Created zeroed by `manage`, populated from
/// the window's reported attributes and hints, owned by the `Registry` until
/// `unmanage` drops it.
#[derive(Debug, Clone)]
pub struct Client {
    pub window: Window,
    pub name: String,
    pub x_position: i16,
    pub y_position: i16,
    pub width: u16,
    pub height: u16,
    pub old_x_position: i16,
    pub old_y_position: i16,
    pub old_width: u16,
    pub old_height: u16,
    pub border_width: u16,
    pub old_border_width: u16,
    pub hints: SizeHints,
    pub hints_valid: bool,
    pub is_fixed: bool,
    pub is_floating: bool,
    pub is_urgent: bool,
    pub never_focus: bool,
}

impl Client {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            name: String::new(),
            x_position: 0,
            y_position: 0,
            width: 0,
            height: 0,
            old_x_position: 0,
            old_y_position: 0,
            old_width: 0,
            old_height: 0,
            border_width: 0,
            old_border_width: 0,
            hints: SizeHints::default(),
            hints_valid: false,
            is_fixed: false,
            is_floating: false,
            is_urgent: false,
            never_focus: false,
        }
    }

    pub fn set_title(&mut self, title: &str) {
        let mut end = title.len().min(MAX_TITLE_BYTES);
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        self.name = title[..end].to_string();
        if self.name.is_empty() {
            self.name = BROKEN_TITLE.to_string();
        }
    }

    pub fn total_width(&self) -> i32 {
        self.width as i32 + 2 * self.border_width as i32
    }

    pub fn total_height(&self) -> i32 {
        self.height as i32 + 2 * self.border_width as i32
    }

    pub fn save_bounds(&mut self) {
        self.old_x_position = self.x_position;
        self.old_y_position = self.y_position;
        self.old_width = self.width;
        self.old_height = self.height;
    }
}

/// The ordered collection of managed clients for the single monitor.
///
/// Two rules govern the order. Every floating client precedes every tiled
/// client (restored authoritatively by the stable partition in `arrange`),
/// and the head of the sequence is the focused client — there is no separate
/// focus pointer to drift out of sync.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Vec<Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The focused client is always the head of the list, or none if empty.
    pub fn head(&self) -> Option<&Client> {
        self.clients.first()
    }

    pub fn head_mut(&mut self) -> Option<&mut Client> {
        self.clients.first_mut()
    }

    pub fn head_window(&self) -> Option<Window> {
        self.clients.first().map(|client| client.window)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Client> {
        self.clients.get(index)
    }

    pub fn contains(&self, window: Window) -> bool {
        self.find(window).is_some()
    }

    pub fn find(&self, window: Window) -> Option<&Client> {
        self.clients.iter().find(|client| client.window == window)
    }

    pub fn find_mut(&mut self, window: Window) -> Option<&mut Client> {
        self.clients
            .iter_mut()
            .find(|client| client.window == window)
    }

    /// Insert preserving the floating-before-tiled invariant: floating
    /// clients (and the first client ever) go to the head, tiled clients go
    /// to the head of the tiled run. Attaching an already-attached window is
    /// a logic error upstream.
    pub fn attach(&mut self, client: Client) {
        debug_assert!(
            !self.contains(client.window),
            "window {} attached twice",
            client.window
        );
        let index = if client.is_floating || self.clients.is_empty() {
            0
        } else {
            self.floating_run_len()
        };
        self.clients.insert(index, client);
    }

    /// Unlink by identity; safe to call for windows that were never attached.
    pub fn detach(&mut self, window: Window) -> Option<Client> {
        let index = self
            .clients
            .iter()
            .position(|client| client.window == window)?;
        Some(self.clients.remove(index))
    }

    /// The focus controller's reordering primitive: move the named client to
    /// the absolute head. Moving the current head is a no-op and never
    /// disturbs its siblings.
    pub fn move_to_head(&mut self, window: Window) {
        let Some(index) = self
            .clients
            .iter()
            .position(|client| client.window == window)
        else {
            return;
        };
        if index == 0 {
            return;
        }
        let client = self.clients.remove(index);
        self.clients.insert(0, client);
    }

    /// Stable partition: floating clients first, tiled second, relative order
    /// preserved within each group. `arrange` runs this as the authoritative
    /// restore of the ordering invariant.
    pub fn partition_floating_first(&mut self) {
        let mut floating = Vec::with_capacity(self.clients.len());
        let mut tiled = Vec::new();
        for client in self.clients.drain(..) {
            if client.is_floating {
                floating.push(client);
            } else {
                tiled.push(client);
            }
        }
        floating.append(&mut tiled);
        self.clients = floating;
    }

    pub fn tiled(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter().filter(|client| !client.is_floating)
    }

    pub fn tiled_windows(&self) -> Vec<Window> {
        self.tiled().map(|client| client.window).collect()
    }

    pub fn windows(&self) -> Vec<Window> {
        self.clients.iter().map(|client| client.window).collect()
    }

    fn floating_run_len(&self) -> usize {
        self.clients
            .iter()
            .take_while(|client| client.is_floating)
            .count()
    }

    #[cfg(test)]
    fn invariant_holds(&self) -> bool {
        let first_tiled = self
            .clients
            .iter()
            .position(|client| !client.is_floating)
            .unwrap_or(self.clients.len());
        self.clients[first_tiled..]
            .iter()
            .all(|client| !client.is_floating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiled(window: Window) -> Client {
        Client::new(window)
    }

    fn floating(window: Window) -> Client {
        let mut client = Client::new(window);
        client.is_floating = true;
        client
    }

    #[test]
    fn attach_keeps_floating_before_tiled() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        registry.attach(floating(2));
        registry.attach(tiled(3));
        registry.attach(floating(4));
        registry.attach(tiled(5));
        registry.detach(2);
        registry.attach(tiled(6));
        registry.detach(5);
        registry.attach(floating(7));

        assert!(registry.invariant_holds());
        assert_eq!(registry.windows(), vec![7, 4, 6, 3, 1]);
    }

    #[test]
    fn tiled_clients_insert_at_the_head_of_the_tiled_run() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        registry.attach(tiled(2));
        registry.attach(tiled(3));
        // Newest tiled client leads: W3, W2, W1.
        assert_eq!(registry.windows(), vec![3, 2, 1]);

        registry.attach(floating(10));
        registry.attach(tiled(4));
        // The floating client keeps the head; W4 leads the tiled run.
        assert_eq!(registry.windows(), vec![10, 4, 3, 2, 1]);
    }

    #[test]
    fn first_client_becomes_head_even_when_tiled() {
        let mut registry = Registry::new();
        registry.attach(tiled(9));
        assert_eq!(registry.head_window(), Some(9));
    }

    #[test]
    fn detach_is_noop_safe() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        assert!(registry.detach(42).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.detach(1).is_some());
        assert!(registry.detach(1).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn move_to_head_reorders() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        registry.attach(tiled(2));
        registry.attach(tiled(3));

        registry.move_to_head(2);
        assert_eq!(registry.windows(), vec![2, 3, 1]);
    }

    #[test]
    fn move_to_head_of_head_is_a_noop() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        registry.attach(floating(2));
        registry.attach(tiled(3));
        let before = registry.windows();

        registry.move_to_head(before[0]);
        assert_eq!(registry.windows(), before);
    }

    #[test]
    fn partition_is_stable() {
        let mut registry = Registry::new();
        registry.attach(tiled(1));
        registry.attach(tiled(2));
        registry.attach(floating(3));
        // Simulate a focus promotion of a tiled client over the floating one.
        registry.move_to_head(2);
        assert_eq!(registry.windows(), vec![2, 3, 1]);

        registry.partition_floating_first();
        assert!(registry.invariant_holds());
        assert_eq!(registry.windows(), vec![3, 2, 1]);
    }

    #[test]
    fn head_is_the_focus_accessor() {
        let mut registry = Registry::new();
        assert!(registry.head().is_none());
        registry.attach(tiled(1));
        registry.attach(tiled(2));
        assert_eq!(registry.head_window(), Some(2));
    }

    #[test]
    fn titles_are_bounded_and_never_empty() {
        let mut client = Client::new(1);
        client.set_title("");
        assert_eq!(client.name, BROKEN_TITLE);

        let long = "x".repeat(400);
        client.set_title(&long);
        assert_eq!(client.name.len(), MAX_TITLE_BYTES);

        // Multi-byte characters are cut at a boundary, not mid-sequence.
        let wide = "é".repeat(200);
        client.set_title(&wide);
        assert!(client.name.len() <= MAX_TITLE_BYTES);
        assert!(client.name.chars().all(|c| c == 'é'));
    }
}
