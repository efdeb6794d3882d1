// Terminal controller for the DIU Transport Smart Tracker
use crate::dtt_assistant::{Assistant, ChatSession};
use crate::dtt_config::AppConfig;
use crate::dtt_editor::{BusDraft, BusEdit};
use crate::dtt_fleet::RouteFilter;
use crate::dtt_models::{BusStatus, Role};
use crate::dtt_session::FleetSession;
use crate::dtt_views::DTTViews;
use chrono_tz::Tz;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio_stream::StreamExt;

const CAPACITY_RANGE: std::ops::RangeInclusive<u32> = 10..=100;

pub struct DTTControllers {
    session: FleetSession,
    config: AppConfig,
    tz: Tz,
    role: Role,
    driver_bus: String,
    assistant: Assistant,
    chat: ChatSession,
    filter: RouteFilter,
}

impl DTTControllers {
    pub fn new(session: FleetSession, config: AppConfig, tz: Tz, role: Role, driver_bus: String, assistant: Assistant) -> Self {
        DTTControllers {
            session,
            config,
            tz,
            role,
            driver_bus,
            assistant,
            chat: ChatSession::default(),
            filter: RouteFilter::All,
        }
    }

    /// Main application loop
    pub fn run(mut self) {
        DTTViews::welcome(
            self.session.store().snapshot().len(),
            self.session.routes().len(),
            self.session.simulation_running(),
        );

        loop {
            DTTViews::show_menu(self.role, &self.filter, self.session.routes());
            let choice = Self::read_input();

            match (choice.trim(), self.role) {
                ("0", _) => {
                    DTTViews::goodbye_message();
                    break;
                }
                ("", _) => {}
                ("1", Role::Driver) => {
                    let snapshot = self.session.store().snapshot();
                    DTTViews::show_driver_console(snapshot.get(&self.driver_bus), self.session.routes(), self.tz);
                    Self::pause();
                }
                ("1", _) => {
                    self.handle_show_fleet();
                    Self::pause();
                }
                ("2", role) if role != Role::Driver => {
                    self.handle_route_filter();
                    Self::pause();
                }
                ("3", role) if role != Role::Driver => {
                    let snapshot = self.session.store().snapshot();
                    let summaries = snapshot.route_summaries(self.session.routes());
                    DTTViews::show_status(&snapshot, &summaries, self.session.routes(), self.role);
                    Self::pause();
                }
                ("4", role) if role != Role::Driver => self.handle_live_tracking(),
                ("5", role) if role.can_use_assistant() => self.handle_chat(),
                ("6" | "7" | "8" | "9", role) if !role.can_manage_fleet() => {
                    DTTViews::permission_denied(role);
                    Self::pause();
                }
                ("6", _) => {
                    self.handle_add_bus();
                    Self::pause();
                }
                ("7", _) => {
                    self.handle_edit_bus();
                    Self::pause();
                }
                ("8", _) => {
                    self.handle_remove_bus();
                    Self::pause();
                }
                ("9", _) => {
                    self.handle_export();
                    Self::pause();
                }
                (other, _) => {
                    DTTViews::invalid_choice(other);
                    Self::pause();
                }
            }
        }

        self.session.shutdown();
    }

    fn handle_show_fleet(&self) {
        let snapshot = self.session.store().snapshot();
        let buses = snapshot.filter_by_route(&self.filter);
        let title = DTTViews::filter_label(&self.filter, self.session.routes());
        DTTViews::show_fleet(&buses, self.session.routes(), self.tz, &title);

        let id = DTTViews::prompt("Bus ID for details (Enter to skip)");
        if id.is_empty() {
            return;
        }
        match self.session.store().snapshot().get(&id) {
            Some(bus) => DTTViews::show_bus_details(bus, self.session.routes(), self.tz),
            None => DTTViews::error(&format!("No bus with ID '{}'", id)),
        }
    }

    fn handle_route_filter(&mut self) {
        DTTViews::show_route_choices(self.session.routes());
        let input = DTTViews::prompt("Route number");

        match input.parse::<usize>() {
            Ok(0) => self.filter = RouteFilter::All,
            Ok(n) if n <= self.session.routes().len() => {
                self.filter = RouteFilter::Route(self.session.routes()[n - 1].id.clone());
            }
            _ => {
                DTTViews::error("Invalid route selection");
                return;
            }
        }
        println!("\n✓ Showing: {}", DTTViews::filter_label(&self.filter, self.session.routes()));
    }

    /// Redraws on every new fleet snapshot until Enter is pressed
    fn handle_live_tracking(&self) {
        println!("\n🔄 Live tracking. Press ENTER at any time to return to the menu");
        let exit_flag = Arc::new(AtomicBool::new(false));
        let exit_flag_clone = exit_flag.clone();

        thread::spawn(move || {
            let mut input = String::new();
            if io::stdin().read_line(&mut input).is_ok() {
                exit_flag_clone.store(true, Ordering::SeqCst);
            }
        });

        let mut updates = self.session.store().updates();
        let mut update_count: u64 = 0;
        let mut redraw = true;

        while !exit_flag.load(Ordering::SeqCst) {
            if redraw {
                update_count += 1;
                let snapshot = self.session.store().snapshot();
                let buses = snapshot.filter_by_route(&self.filter);
                Self::clear_screen();
                DTTViews::show_live_header(update_count, &snapshot, self.tz);
                let title = DTTViews::filter_label(&self.filter, self.session.routes());
                DTTViews::show_fleet(&buses, self.session.routes(), self.tz, &title);
                println!("\n⏱️  Updates every {} ms (press ENTER to exit)", self.config.tick_interval_ms);
            }

            redraw = self
                .session
                .runtime()
                .block_on(async { tokio::time::timeout(Duration::from_millis(200), updates.next()).await })
                .is_ok_and(|next| next.is_some());
        }
        println!("\n👋 Leaving live tracking...");
    }

    fn handle_chat(&mut self) {
        DTTViews::show_chat_intro(self.assistant.is_configured());
        loop {
            let query = DTTViews::prompt("You");
            if query.is_empty() {
                break;
            }
            println!("   🤖 thinking...");
            let reply = self.chat.ask(&self.assistant, &query);
            DTTViews::show_chat_message(reply, self.tz);
        }
    }

    fn handle_add_bus(&self) {
        let routes = self.session.routes();
        let mut draft = BusDraft::blank(routes, self.config.default_origin, self.config.default_capacity);

        println!("\n➕ ADD NEW BUS");
        let Some(id) = Self::prompt_required(&mut io::stdin().lock(), "Bus ID (e.g. B-1061)") else {
            DTTViews::operation_cancelled();
            return;
        };
        let Some(name) = Self::prompt_required(&mut io::stdin().lock(), "Bus name (e.g. DIU Bus 1061)") else {
            DTTViews::operation_cancelled();
            return;
        };
        draft.id = id;
        draft.name = name;

        DTTViews::show_route_choices(routes);
        let input = DTTViews::prompt_with_default("Route number", &draft.route_id);
        if let Some(route_id) = self.pick_route(&input) {
            draft.route_id = route_id;
        }

        let input = DTTViews::prompt_with_default("Capacity (10-100)", &draft.capacity.to_string());
        if let Some(capacity) = Self::parse_capacity(&input) {
            draft.capacity = capacity;
        }

        let input = DTTViews::prompt_with_default("Status (active/inactive/maintenance)", draft.status.as_str());
        if let Some(status) = Self::parse_status(&input) {
            draft.status = status;
        }

        let driver = DTTViews::prompt("Driver name (optional)");
        if !driver.is_empty() {
            draft.driver_name = Some(driver);
        }

        match self.session.editor().create(draft) {
            Ok(notification) => DTTViews::show_notification(&notification),
            Err(e) => DTTViews::error(&e.to_string()),
        }
    }

    /// The form is filled from the bus as it was when opened; the editor
    /// merges the submitted fields into whatever the store holds at save time.
    fn handle_edit_bus(&self) {
        let id = DTTViews::prompt("Bus ID to edit");
        let snapshot = self.session.store().snapshot();
        let Some(bus) = snapshot.get(&id) else {
            DTTViews::error(&format!("No bus with ID '{}'", id));
            return;
        };

        let mut draft = BusDraft::from_bus(bus);
        DTTViews::show_bus_details(bus, self.session.routes(), self.tz);
        println!("\n✏️  EDIT BUS DETAILS (Enter keeps the current value)");

        let input = DTTViews::prompt_with_default("Bus name", &draft.name);
        if !input.is_empty() {
            draft.name = input;
        }

        DTTViews::show_route_choices(self.session.routes());
        let input = DTTViews::prompt_with_default("Route number", &draft.route_id);
        if let Some(route_id) = self.pick_route(&input) {
            draft.route_id = route_id;
        }

        let input = DTTViews::prompt_with_default("Capacity (10-100)", &draft.capacity.to_string());
        if let Some(capacity) = Self::parse_capacity(&input) {
            draft.capacity = capacity;
        }

        let input = DTTViews::prompt_with_default("Status (active/inactive/maintenance)", draft.status.as_str());
        if let Some(status) = Self::parse_status(&input) {
            draft.status = status;
        }

        let edit: BusEdit = draft.to_edit();
        let notification = self.session.editor().update(&draft.id, &edit);
        DTTViews::show_notification(&notification);
    }

    fn handle_remove_bus(&self) {
        let id = DTTViews::prompt("Bus ID to remove");
        if id.is_empty() {
            DTTViews::operation_cancelled();
            return;
        }

        let routes = self.session.routes();
        let tz = self.tz;
        let outcome = self.session.editor().delete(&id, |bus| {
            if let Some(bus) = bus {
                DTTViews::show_bus_details(bus, routes, tz);
            }
            let answer = DTTViews::prompt("Are you sure you want to remove this bus? (y/n)");
            answer.eq_ignore_ascii_case("y")
        });

        match outcome {
            Some(notification) => DTTViews::show_notification(&notification),
            None => DTTViews::operation_cancelled(),
        }
    }

    fn handle_export(&self) {
        let input = DTTViews::prompt_with_default("Output file", "fleet.geojson");
        let path = PathBuf::from(if input.is_empty() { "fleet.geojson" } else { input.as_str() });

        match self.session.export_geojson(&path, &self.filter) {
            Ok(count) => println!("\n✓ Exported {} buses to {}", count, path.display()),
            Err(e) => DTTViews::error(&e.to_string()),
        }
    }

    // ========================================================================
    // Input helpers
    // ========================================================================

    /// Re-asks until a value is given; `None` when input closes first
    fn prompt_required<R: BufRead>(reader: &mut R, label: &str) -> Option<String> {
        loop {
            let value = DTTViews::prompt_from(reader, label)?;
            if !value.is_empty() {
                return Some(value);
            }
            println!("   ⚠️  This field is required");
        }
    }

    /// Accepts a 1-based route number or a route id
    fn pick_route(&self, input: &str) -> Option<String> {
        if input.is_empty() {
            return None;
        }
        let routes = self.session.routes();
        if let Ok(n) = input.parse::<usize>() {
            if (1..=routes.len()).contains(&n) {
                return Some(routes[n - 1].id.clone());
            }
        }
        match routes.iter().find(|r| r.id.eq_ignore_ascii_case(input)) {
            Some(route) => Some(route.id.clone()),
            None => {
                println!("   ⚠️  Unknown route '{}', keeping current", input);
                None
            }
        }
    }

    fn parse_capacity(input: &str) -> Option<u32> {
        if input.is_empty() {
            return None;
        }
        match input.parse::<u32>() {
            Ok(capacity) if CAPACITY_RANGE.contains(&capacity) => Some(capacity),
            _ => {
                println!(
                    "   ⚠️  Capacity must be between {} and {}, keeping current",
                    CAPACITY_RANGE.start(),
                    CAPACITY_RANGE.end()
                );
                None
            }
        }
    }

    fn parse_status(input: &str) -> Option<BusStatus> {
        if input.is_empty() {
            return None;
        }
        match input.parse::<BusStatus>() {
            Ok(status) => Some(status),
            Err(e) => {
                println!("   ⚠️  {}, keeping current", e);
                None
            }
        }
    }

    fn pause() {
        print!("\n📌 Press Enter to continue...");
        let _ = io::stdout().flush();
        let mut dummy = String::new();
        let _ = io::stdin().read_line(&mut dummy);
    }

    fn read_input() -> String {
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            // EOF quits
            Ok(0) => "0".to_string(),
            Ok(_) => input,
            Err(e) => {
                eprintln!("⚠️  Error reading input: {}", e);
                String::new()
            }
        }
    }

    fn clear_screen() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_must_be_within_form_bounds() {
        assert_eq!(DTTControllers::parse_capacity(""), None);
        assert_eq!(DTTControllers::parse_capacity("45"), Some(45));
        assert_eq!(DTTControllers::parse_capacity("5"), None);
        assert_eq!(DTTControllers::parse_capacity("lots"), None);
    }

    #[test]
    fn required_prompt_skips_blank_lines() {
        let mut input = io::Cursor::new("\n   \nB-1061\n");
        assert_eq!(DTTControllers::prompt_required(&mut input, "Bus ID").as_deref(), Some("B-1061"));
    }

    #[test]
    fn required_prompt_gives_up_when_input_closes() {
        assert_eq!(DTTControllers::prompt_required(&mut io::Cursor::new(""), "Bus ID"), None);
        assert_eq!(DTTControllers::prompt_required(&mut io::Cursor::new("\n\n"), "Bus ID"), None);
    }

    #[test]
    fn status_input_accepts_names() {
        assert_eq!(DTTControllers::parse_status("maintenance"), Some(BusStatus::Maintenance));
        assert_eq!(DTTControllers::parse_status(""), None);
        assert_eq!(DTTControllers::parse_status("parked"), None);
    }
}
