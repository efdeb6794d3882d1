// Terminal views for the DIU Transport Smart Tracker
use crate::dtt_editor::{Notification, Severity};
use crate::dtt_fleet::{FleetSnapshot, RouteFilter, RouteSummary};
use crate::dtt_models::{Bus, BusStatus, ChatMessage, ChatRole, DTTModels, Role, Route};
use chrono::Utc;
use chrono_tz::Tz;
use std::io::{self, BufRead, Write};

pub struct DTTViews;

impl DTTViews {
    /// Main menu, trimmed to what the current role may do
    pub fn show_menu(role: Role, filter: &RouteFilter, routes: &[Route]) {
        println!("\n{}", "═".repeat(60));
        println!("     🚌 DIU TRANSPORT - SMART TRACKER");
        println!("     {} | Showing: {}", role.label(), Self::filter_label(filter, routes));
        println!("{}", "═".repeat(60));
        println!("\n📋 MENU OPTIONS");

        if role == Role::Driver {
            println!("  1️⃣  Driver console");
        } else {
            println!("  1️⃣  Show fleet");
            println!("  2️⃣  Filter by route");
            println!("  3️⃣  System status 📊");
            println!("  4️⃣  Live tracking 🔄");
            println!("  5️⃣  Ask DIU Bot 💬");
        }
        if role.can_manage_fleet() {
            println!("  6️⃣  Add bus");
            println!("  7️⃣  Edit bus");
            println!("  8️⃣  Remove bus");
            println!("  9️⃣  Export map layer (GeoJSON)");
        }
        println!("  0️⃣  Quit application");
        println!("\n{}", "─".repeat(60));
        print!("➜ Your choice: ");
        let _ = io::stdout().flush();
    }

    /// Empty string on EOF; use `prompt_from` where EOF must end the flow
    pub fn prompt(label: &str) -> String {
        Self::prompt_from(&mut io::stdin().lock(), label).unwrap_or_default()
    }

    /// Trimmed line from `reader`, or `None` once input is closed
    pub fn prompt_from<R: BufRead>(reader: &mut R, label: &str) -> Option<String> {
        print!("➜ {}: ", label);
        let _ = io::stdout().flush();
        let mut input = String::new();
        match reader.read_line(&mut input) {
            Ok(0) => None,
            Ok(_) => Some(input.trim().to_string()),
            Err(e) => {
                eprintln!("⚠️  Error reading input: {}", e);
                None
            }
        }
    }

    /// Prompt showing the current value; Enter keeps it
    pub fn prompt_with_default(label: &str, current: &str) -> String {
        Self::prompt(&format!("{} [{}]", label, current))
    }

    pub fn filter_label(filter: &RouteFilter, routes: &[Route]) -> String {
        match filter {
            RouteFilter::All => "All Routes".to_string(),
            RouteFilter::Route(id) => DTTModels::get_route_by_id(id, routes)
                .map(|r| r.name.clone())
                .unwrap_or_else(|| id.clone()),
        }
    }

    pub fn show_route_choices(routes: &[Route]) {
        println!("\n🗺️  Routes:");
        println!("  0. All Routes");
        for (i, route) in routes.iter().enumerate() {
            println!(
                "  {}. {} {} ({} → {})",
                i + 1,
                Self::colorize_route(&route.id, &route.color),
                route.name,
                route.origin,
                route.destination
            );
        }
    }

    pub fn show_fleet(buses: &[&Bus], routes: &[Route], tz: Tz, title: &str) {
        println!("\n{}", "═".repeat(86));
        println!("🚌 {} ({} buses)", title, buses.len());
        println!("{}", "═".repeat(86));

        if buses.is_empty() {
            println!("\n  No buses on this route right now.");
            return;
        }

        println!(
            "  {:<8} {:<16} {:<6} {:<13} {:>8} {:>9} {:>21}  {}",
            "ID", "Name", "Route", "Status", "Speed", "Load", "Position", "Updated"
        );
        println!("  {}", "─".repeat(84));
        for bus in buses {
            let color = DTTModels::get_route_color(&bus.route_id, routes);
            println!(
                "  {:<8} {:<16} {} {} {:>5.1} km/h {:>3}/{:<3} ({:>8.4}, {:>8.4})  {}",
                bus.id,
                truncate(&bus.name, 16),
                Self::colorize_route(&format!("{:<4}", bus.route_id), &color),
                Self::status_badge(bus.status),
                bus.speed,
                bus.passengers,
                bus.capacity,
                bus.location.lat,
                bus.location.lng,
                DTTModels::format_time(&bus.last_updated, tz)
            );
        }
    }

    pub fn show_status(snapshot: &FleetSnapshot, summaries: &[RouteSummary], routes: &[Route], role: Role) {
        println!("\n{}", "═".repeat(60));
        println!("📊 SYSTEM STATUS");
        println!("{}", "═".repeat(60));
        println!("  Active buses : {}", snapshot.active_count());
        println!("  Inactive     : {}", snapshot.count_by_status(BusStatus::Inactive));
        println!("  Maintenance  : {}", snapshot.count_by_status(BusStatus::Maintenance));
        println!("  Routes       : {}", routes.len());
        println!("  Revision     : {}", snapshot.revision);
        if snapshot.is_empty() {
            println!("\n  The fleet is empty. Admins can add buses from the menu.");
            println!("{}", "═".repeat(60));
            return;
        }

        println!("\n  {:<22} {:>6} {:>7} {:>11}", "Route", "Buses", "Active", "Passengers");
        println!("  {}", "─".repeat(50));
        for summary in summaries {
            let color = DTTModels::get_route_color(&summary.route_id, routes);
            println!(
                "  {} {:<17} {:>6} {:>7} {:>11}",
                Self::colorize_route(&summary.route_id, &color),
                summary.route_name,
                summary.total,
                summary.active,
                summary.passengers
            );
        }

        if role.can_manage_fleet() {
            println!("\n  Backend: in-memory (simulated)");
        }
        println!("{}", "═".repeat(60));
    }

    pub fn show_bus_details(bus: &Bus, routes: &[Route], tz: Tz) {
        let route = DTTModels::get_route_by_id(&bus.route_id, routes);
        println!("\n{}", "─".repeat(60));
        println!("🚌 {} ({})", bus.name, bus.id);
        match route {
            Some(r) => println!(
                "  🗺️  Route: {} {} | Stops: {}",
                Self::colorize_route(&r.id, &r.color),
                r.name,
                r.stops.join(" → ")
            ),
            None => println!("  🗺️  Route: {} (not in catalog)", bus.route_id),
        }
        if let Some(driver) = &bus.driver_name {
            println!("  👤 Driver: {}", driver);
        }
        println!("  🚦 Status: {}", Self::status_badge(bus.status));
        println!("  📍 Position: ({:.6}, {:.6})", bus.location.lat, bus.location.lng);
        println!("  ⏱️  Speed: {:.1} km/h", bus.speed);
        println!(
            "  👥 Passengers: {}/{} ({:.0}%)",
            bus.passengers,
            bus.capacity,
            bus.occupancy_percent()
        );
        println!(
            "  🕐 Updated: {} ({}s ago)",
            DTTModels::format_time(&bus.last_updated, tz),
            DTTModels::age_seconds(&bus.last_updated, &Utc::now())
        );
        println!("{}", "─".repeat(60));
    }

    pub fn show_driver_console(bus: Option<&Bus>, routes: &[Route], tz: Tz) {
        println!("\n{}", "═".repeat(60));
        println!("🧑‍✈️  DRIVER CONSOLE");
        println!("{}", "═".repeat(60));
        match bus {
            Some(bus) => {
                Self::show_bus_details(bus, routes, tz);
                println!("\n  📡 GPS tracking is active. Your location is shared with students.");
            }
            None => println!("\n  ⚠️  No bus is assigned to this console."),
        }
    }

    pub fn show_live_header(update: u64, snapshot: &FleetSnapshot, tz: Tz) {
        println!("\n{}", "═".repeat(70));
        println!("🔄 LIVE TRACKING - Update #{} (revision {})", update, snapshot.revision);
        println!("📅 {}", Utc::now().with_timezone(&tz).format("%A, %B %d, %Y at %H:%M:%S %Z"));
        println!("📊 {} buses | {} active", snapshot.len(), snapshot.active_count());
        println!("{}", "═".repeat(70));
    }

    /// Toast-style notification line
    pub fn show_notification(notification: &Notification) {
        let (icon, code) = match notification.severity {
            Severity::Success => ("✓", "32"),
            Severity::Info => ("ℹ️ ", "36"),
        };
        println!("\n\x1b[{}m{} {}\x1b[0m", code, icon, notification.message);
    }

    pub fn show_chat_message(message: &ChatMessage, tz: Tz) {
        let who = match message.role {
            ChatRole::User => "🧑 You",
            ChatRole::Model => "🤖 DIU Bot",
        };
        println!(
            "\n  {} [{}]\n  {}",
            who,
            DTTModels::format_time(&message.timestamp, tz),
            message.text.replace('\n', "\n  ")
        );
    }

    pub fn show_chat_intro(configured: bool) {
        println!("\n{}", "─".repeat(60));
        println!("💬 DIU Bot - ask about routes, stops and timings");
        if !configured {
            println!("   (no API key configured, replies will be limited)");
        }
        println!("   Empty line returns to the menu");
        println!("{}", "─".repeat(60));
    }

    pub fn error(message: &str) {
        println!("\n✗ {}", message);
    }

    pub fn permission_denied(role: Role) {
        println!("\n⛔ {} cannot manage the fleet. Restart with --role admin.", role.label());
    }

    pub fn invalid_choice(choice: &str) {
        println!("\n✗ Invalid option '{}'.", choice);
    }

    pub fn operation_cancelled() {
        println!("\n✓ Operation cancelled");
    }

    pub fn welcome(fleet_size: usize, routes: usize, simulated: bool) {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║            🚌 DIU TRANSPORT - SMART TRACKER              ║");
        println!("  ║          Daffodil Smart City shuttle dashboard           ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  🚍 {} buses on {} routes", fleet_size, routes);
        if simulated {
            println!("  📡 Positions are simulated and refresh continuously");
        }
        println!("\n{}", "═".repeat(70));
    }

    pub fn goodbye_message() {
        println!("\n{}", "═".repeat(60));
        println!("       👋 Thank you for using DIU Transport!");
        println!("{}", "═".repeat(60));
        println!();
    }

    /// Route badge with ANSI background color and contrasting text
    pub fn colorize_route(code: &str, hex_color: &str) -> String {
        let (r, g, b) = DTTModels::parse_hex_color(hex_color);

        let luminance = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0;
        let text_color = if luminance > 0.5 { "30" } else { "97" };

        format!("\x1b[48;2;{};{};{}m\x1b[{}m {} \x1b[0m", r, g, b, text_color, code)
    }

    fn status_badge(status: BusStatus) -> String {
        let (dot, code) = match status {
            BusStatus::Active => ("🟢", "32"),
            BusStatus::Inactive => ("⚪", "90"),
            BusStatus::Maintenance => ("🔴", "31"),
        };
        format!("{} \x1b[{}m{:<11}\x1b[0m", dot, code, status.as_str())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtt_models::DEFAULT_ROUTES;

    #[test]
    fn filter_labels_use_route_names() {
        assert_eq!(DTTViews::filter_label(&RouteFilter::All, &DEFAULT_ROUTES), "All Routes");
        assert_eq!(
            DTTViews::filter_label(&RouteFilter::Route("R4".to_string()), &DEFAULT_ROUTES),
            "DSC - Dhanmondi"
        );
        assert_eq!(DTTViews::filter_label(&RouteFilter::Route("R9".to_string()), &DEFAULT_ROUTES), "R9");
    }

    #[test]
    fn badges_pick_contrasting_text() {
        assert!(DTTViews::colorize_route("R2", "#3b82f6").contains("\x1b[97m"));
        assert!(DTTViews::colorize_route("R3", "#f59e0b").contains("\x1b[30m"));
    }

    #[test]
    fn prompt_reports_closed_input() {
        let mut input = io::Cursor::new("  B-7 \n");
        assert_eq!(DTTViews::prompt_from(&mut input, "Bus ID").as_deref(), Some("B-7"));
        assert_eq!(DTTViews::prompt_from(&mut input, "Bus ID"), None);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("DIU Bus 1000", 16), "DIU Bus 1000");
        assert_eq!(truncate("Daffodil Shuttle Express", 8), "Daffodi…");
    }
}
