/// Geometry for the single managed output: the full screen plus the usable
/// window area left over once the bar strip is reserved.
#[derive(Debug, Clone)]
pub struct Monitor {
    pub bar_y_position: i32,
    pub screen_x: i32,
    pub screen_y: i32,
    pub screen_width: i32,
    pub screen_height: i32,
    pub window_area_x: i32,
    pub window_area_y: i32,
    pub window_area_width: i32,
    pub window_area_height: i32,
    pub show_bar: bool,
}

impl Monitor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            bar_y_position: 0,
            screen_x: 0,
            screen_y: 0,
            screen_width: width as i32,
            screen_height: height as i32,
            window_area_x: 0,
            window_area_y: 0,
            window_area_width: width as i32,
            window_area_height: height as i32,
            show_bar: true,
        }
    }

    /// Re-derive the window area from the screen bounds and the bar strip.
    /// A hidden bar parks itself just above the screen.
    pub fn update_bar_position(&mut self, bar_height: i32) {
        self.window_area_y = self.screen_y;
        self.window_area_height = self.screen_height;
        if self.show_bar {
            self.window_area_height -= bar_height;
            self.bar_y_position = self.window_area_y;
            self.window_area_y += bar_height;
        } else {
            self.bar_y_position = -bar_height;
        }
    }

    /// Returns true when the screen size actually changed.
    pub fn update_geometry(&mut self, width: i32, height: i32, bar_height: i32) -> bool {
        if self.screen_width == width && self.screen_height == height {
            return false;
        }
        self.screen_width = width;
        self.screen_height = height;
        self.window_area_width = width;
        self.update_bar_position(bar_height);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_space_is_reserved_at_the_top() {
        let mut monitor = Monitor::new(1920, 1080);
        monitor.update_bar_position(20);

        assert_eq!(monitor.bar_y_position, 0);
        assert_eq!(monitor.window_area_y, 20);
        assert_eq!(monitor.window_area_height, 1060);
    }

    #[test]
    fn hidden_bar_releases_the_full_screen() {
        let mut monitor = Monitor::new(1920, 1080);
        monitor.show_bar = false;
        monitor.update_bar_position(20);

        assert_eq!(monitor.bar_y_position, -20);
        assert_eq!(monitor.window_area_y, 0);
        assert_eq!(monitor.window_area_height, 1080);
    }

    #[test]
    fn geometry_update_reports_dirtiness() {
        let mut monitor = Monitor::new(1920, 1080);
        assert!(!monitor.update_geometry(1920, 1080, 20));
        assert!(monitor.update_geometry(2560, 1440, 20));
        assert_eq!(monitor.window_area_width, 2560);
        assert_eq!(monitor.window_area_height, 1420);
    }
}
