// Desktop dashboard for the DIU Transport Smart Tracker using egui/eframe
use crate::dtt_assistant::{Assistant, ChatSession};
use crate::dtt_config::AppConfig;
use crate::dtt_editor::{BusDraft, Notification, ReconcilingEditor, Severity};
use crate::dtt_fleet::{FleetSnapshot, RouteFilter};
use crate::dtt_models::{Bus, BusStatus, ChatRole, DTTModels, Location, Role, Route};
use crate::dtt_session::FleetSession;
use chrono::Utc;
use chrono_tz::Tz;
use eframe::egui;
use egui::{Align2, Color32, FontId, Pos2, Rect, RichText, Sense, Stroke, Ui};
use egui_extras::{Column, TableBuilder};
use poll_promise::Promise;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const MIN_MAP_SPAN: f64 = 0.02;

// ============================================================================
// Application State
// ============================================================================

#[derive(PartialEq, Clone, Copy)]
enum AppView {
    Map,
    FleetList,
}

struct BusForm {
    draft: BusDraft,
    is_new: bool,
    error: Option<String>,
}

pub struct DTTApp {
    // Taken on drop so the simulation can be joined
    session: Option<FleetSession>,
    editor: ReconcilingEditor,
    routes: Vec<Route>,
    config: AppConfig,
    tz: Tz,

    role: Role,
    driver_bus: String,
    current_view: AppView,
    filter: RouteFilter,

    form: Option<BusForm>,
    pending_delete: Option<String>,
    toast: Option<Notification>,
    notifications: broadcast::Receiver<Notification>,

    assistant: Assistant,
    chat: ChatSession,
    chat_open: bool,
    chat_input: String,
    pending_reply: Option<Promise<String>>,
}

impl DTTApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        session: FleetSession,
        config: AppConfig,
        tz: Tz,
        role: Role,
        driver_bus: String,
        assistant: Assistant,
    ) -> Self {
        let editor = session.editor().clone();
        let notifications = editor.subscribe();
        Self {
            routes: session.routes().to_vec(),
            session: Some(session),
            editor,
            config,
            tz,
            role,
            driver_bus,
            current_view: AppView::Map,
            filter: RouteFilter::All,
            form: None,
            pending_delete: None,
            toast: None,
            notifications,
            assistant,
            chat: ChatSession::default(),
            chat_open: false,
            chat_input: String::new(),
            pending_reply: None,
        }
    }

    fn poll_notifications(&mut self) {
        loop {
            match self.notifications.try_recv() {
                Ok(notification) => self.toast = Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::debug!("Toast queue lagged, {} notifications skipped", skipped);
                }
                Err(_) => break,
            }
        }
        if self
            .toast
            .as_ref()
            .is_some_and(|t| t.is_expired(Instant::now(), self.config.toast_ttl()))
        {
            self.toast = None;
        }
    }

    fn check_reply(&mut self) {
        if let Some(promise) = &self.pending_reply {
            if let Some(reply) = promise.ready() {
                self.chat.push(ChatRole::Model, reply.clone());
                self.pending_reply = None;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Panels
    // ------------------------------------------------------------------------

    fn show_top_bar(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.heading("🚌 DIU Transport - Smart Tracker");
            ui.separator();

            if self.role.can_manage_fleet() {
                ui.selectable_value(&mut self.current_view, AppView::Map, "🗺 Map View");
                ui.selectable_value(&mut self.current_view, AppView::FleetList, "📋 Fleet List");
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.label(Utc::now().with_timezone(&self.tz).format("%H:%M:%S").to_string());
                ui.separator();
                egui::ComboBox::from_id_source("role_select")
                    .selected_text(self.role.label())
                    .show_ui(ui, |ui| {
                        for role in [Role::Student, Role::Driver, Role::Admin] {
                            ui.selectable_value(&mut self.role, role, role.label());
                        }
                    });
                if self.role.can_use_assistant() && ui.button("💬 DIU Bot").clicked() {
                    self.chat_open = !self.chat_open;
                }
            });
        });

        if !self.role.can_manage_fleet() {
            self.current_view = AppView::Map;
        }
    }

    fn show_filter_bar(&mut self, ui: &mut Ui) {
        ui.horizontal_wrapped(|ui| {
            if ui.selectable_label(self.filter == RouteFilter::All, "All Routes").clicked() {
                self.filter = RouteFilter::All;
            }
            for route in &self.routes {
                let selected = self.filter == RouteFilter::Route(route.id.clone());
                let text = RichText::new(&route.name).color(route_color(&self.routes, &route.id));
                if ui.selectable_label(selected, text).clicked() {
                    self.filter = RouteFilter::Route(route.id.clone());
                }
            }
        });
    }

    fn show_status_card(&self, ui: &mut Ui, snapshot: &FleetSnapshot) {
        ui.heading("System Status");
        ui.separator();
        ui.label(RichText::new(format!("{}", snapshot.active_count())).size(28.0).strong());
        ui.label("Active buses");
        ui.add_space(8.0);
        ui.label(RichText::new(format!("{}", self.routes.len())).size(28.0).strong());
        ui.label("Routes");
        ui.add_space(8.0);
        ui.label(format!("Maintenance: {}", snapshot.count_by_status(BusStatus::Maintenance)));
        ui.label(format!("Revision: {}", snapshot.revision));

        ui.add_space(16.0);
        ui.separator();
        ui.label("Legend");
        for route in &self.routes {
            ui.horizontal(|ui| {
                ui.colored_label(route_color(&self.routes, &route.id), "⏺");
                ui.label(&route.id);
                ui.weak(&route.destination);
            });
        }
    }

    fn show_map(&self, ui: &mut Ui, snapshot: &FleetSnapshot) {
        let buses = snapshot.filter_by_route(&self.filter);
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::hover());
        let rect = response.rect;
        painter.rect_filled(rect, 6.0, Color32::from_rgb(236, 240, 243));

        let origin = self.config.default_origin;
        let bounds = MapBounds::around(buses.iter().map(|b| b.location).chain(std::iter::once(origin)));

        let campus = bounds.project(origin, rect);
        painter.rect_filled(Rect::from_center_size(campus, egui::vec2(12.0, 12.0)), 2.0, Color32::DARK_GRAY);
        painter.text(
            campus + egui::vec2(8.0, -8.0),
            Align2::LEFT_BOTTOM,
            "DSC",
            FontId::proportional(12.0),
            Color32::DARK_GRAY,
        );

        let hover = response.hover_pos();
        let mut hovered: Option<(&Bus, Pos2)> = None;
        for bus in &buses {
            let pos = bounds.project(bus.location, rect);
            let color = route_color(&self.routes, &bus.route_id);
            if bus.is_active() {
                painter.circle_filled(pos, 6.0, color);
            } else {
                painter.circle_stroke(pos, 5.0, Stroke::new(2.0, color));
            }
            if hover.is_some_and(|h| h.distance(pos) < 8.0) {
                hovered = Some((*bus, pos));
            }
        }

        if let Some((bus, pos)) = hovered {
            painter.circle_stroke(pos, 9.0, Stroke::new(2.0, Color32::BLACK));
            painter.text(
                pos + egui::vec2(10.0, -10.0),
                Align2::LEFT_BOTTOM,
                format!("{} · {} · {:.0} km/h · {}/{}", bus.name, bus.route_id, bus.speed, bus.passengers, bus.capacity),
                FontId::proportional(13.0),
                Color32::BLACK,
            );
        }

        painter.text(
            rect.left_bottom() + egui::vec2(8.0, -8.0),
            Align2::LEFT_BOTTOM,
            format!("{} buses shown", buses.len()),
            FontId::proportional(12.0),
            Color32::GRAY,
        );
    }

    fn show_fleet_list(&mut self, ui: &mut Ui, snapshot: &FleetSnapshot) {
        ui.horizontal(|ui| {
            ui.heading("Fleet Management");
            if ui.button("➕ Add Bus").clicked() {
                self.form = Some(BusForm {
                    draft: BusDraft::blank(&self.routes, self.config.default_origin, self.config.default_capacity),
                    is_new: true,
                    error: None,
                });
            }
        });
        ui.separator();

        let buses = snapshot.filter_by_route(&self.filter);
        let mut edit_request: Option<String> = None;
        let mut delete_request: Option<String> = None;

        TableBuilder::new(ui)
            .striped(true)
            .resizable(false)
            .column(Column::auto().at_least(70.0))
            .column(Column::auto().at_least(140.0))
            .column(Column::auto().at_least(60.0))
            .column(Column::auto().at_least(100.0))
            .column(Column::auto().at_least(80.0))
            .column(Column::auto().at_least(80.0))
            .column(Column::remainder())
            .header(22.0, |mut header| {
                for title in ["Bus ID", "Name", "Route", "Status", "Speed", "Load", "Actions"] {
                    header.col(|ui| {
                        ui.strong(title);
                    });
                }
            })
            .body(|mut body| {
                for bus in &buses {
                    body.row(24.0, |mut row| {
                        row.col(|ui| {
                            ui.monospace(&bus.id);
                        });
                        row.col(|ui| {
                            ui.label(&bus.name);
                        });
                        row.col(|ui| {
                            ui.colored_label(route_color(&self.routes, &bus.route_id), &bus.route_id);
                        });
                        row.col(|ui| {
                            ui.colored_label(status_color(bus.status), bus.status.as_str());
                        });
                        row.col(|ui| {
                            ui.label(format!("{:.1} km/h", bus.speed));
                        });
                        row.col(|ui| {
                            ui.label(format!("{}/{}", bus.passengers, bus.capacity));
                        });
                        row.col(|ui| {
                            if ui.small_button("✏ Edit").clicked() {
                                edit_request = Some(bus.id.clone());
                            }
                            if ui.small_button("🗑 Delete").clicked() {
                                delete_request = Some(bus.id.clone());
                            }
                        });
                    });
                }
            });

        if let Some(id) = edit_request {
            if let Some(bus) = snapshot.get(&id) {
                self.form = Some(BusForm { draft: BusDraft::from_bus(bus), is_new: false, error: None });
            }
        }
        if delete_request.is_some() {
            self.pending_delete = delete_request;
        }
    }

    fn show_driver_console(&self, ui: &mut Ui, snapshot: &FleetSnapshot) {
        ui.heading("Driver Console");
        ui.separator();
        match snapshot.get(&self.driver_bus) {
            Some(bus) => {
                ui.label(RichText::new(&bus.name).size(20.0).strong());
                ui.label(format!(
                    "Route: {}",
                    DTTModels::get_route_by_id(&bus.route_id, &self.routes)
                        .map(|r| r.name.as_str())
                        .unwrap_or(&bus.route_id)
                ));
                ui.colored_label(status_color(bus.status), bus.status.label());
                ui.label(format!("Speed: {:.1} km/h", bus.speed));
                ui.label(format!("Passengers: {}/{}", bus.passengers, bus.capacity));
                ui.label(format!("Position: ({:.5}, {:.5})", bus.location.lat, bus.location.lng));
                ui.weak(format!("Updated {}", DTTModels::format_time(&bus.last_updated, self.tz)));
                ui.add_space(8.0);
                ui.colored_label(Color32::from_rgb(16, 185, 129), "📡 GPS tracking is active");
            }
            None => {
                ui.colored_label(Color32::YELLOW, format!("⚠ Bus {} is not in the fleet", self.driver_bus));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Windows
    // ------------------------------------------------------------------------

    fn show_form_window(&mut self, ctx: &egui::Context) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        let title = if form.is_new { "Add New Bus" } else { "Edit Bus" };
        let mut close = false;
        let mut submit = false;

        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                egui::Grid::new("bus_form").num_columns(2).spacing([12.0, 8.0]).show(ui, |ui| {
                    ui.label("Bus ID");
                    ui.add_enabled(form.is_new, egui::TextEdit::singleline(&mut form.draft.id).hint_text("e.g. B-101"));
                    ui.end_row();

                    ui.label("Bus Name");
                    ui.text_edit_singleline(&mut form.draft.name);
                    ui.end_row();

                    ui.label("Route");
                    let selected = DTTModels::get_route_by_id(&form.draft.route_id, &self.routes)
                        .map(|r| r.name.clone())
                        .unwrap_or_else(|| form.draft.route_id.clone());
                    egui::ComboBox::from_id_source("route_select")
                        .selected_text(selected)
                        .show_ui(ui, |ui| {
                            for route in &self.routes {
                                ui.selectable_value(&mut form.draft.route_id, route.id.clone(), &route.name);
                            }
                        });
                    ui.end_row();

                    ui.label("Capacity");
                    ui.add(egui::DragValue::new(&mut form.draft.capacity).clamp_range(10..=100));
                    ui.end_row();

                    ui.label("Status");
                    egui::ComboBox::from_id_source("status_select")
                        .selected_text(form.draft.status.label())
                        .show_ui(ui, |ui| {
                            for status in BusStatus::ALL {
                                ui.selectable_value(&mut form.draft.status, status, status.label());
                            }
                        });
                    ui.end_row();
                });

                if let Some(error) = &form.error {
                    ui.colored_label(Color32::RED, error);
                }

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Cancel").clicked() {
                        close = true;
                    }
                    let label = if form.is_new { "Create Bus" } else { "Save Changes" };
                    if ui.button(label).clicked() {
                        submit = true;
                    }
                });
            });

        if submit {
            if form.draft.id.trim().is_empty() || form.draft.name.trim().is_empty() {
                form.error = Some("Bus ID and name are required".to_string());
            } else if form.is_new {
                match self.editor.create(form.draft.clone()) {
                    Ok(_) => close = true,
                    Err(e) => form.error = Some(e.to_string()),
                }
            } else {
                self.editor.update(&form.draft.id, &form.draft.to_edit());
                close = true;
            }
        }
        if close {
            self.form = None;
        }
    }

    fn show_delete_confirm(&mut self, ctx: &egui::Context) {
        let Some(id) = self.pending_delete.clone() else {
            return;
        };
        let mut answer: Option<bool> = None;

        egui::Window::new("Remove Bus")
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!("Are you sure you want to remove bus {}?", id));
                ui.horizontal(|ui| {
                    if ui.button("Cancel").clicked() {
                        answer = Some(false);
                    }
                    if ui.button(RichText::new("Remove").color(Color32::RED)).clicked() {
                        answer = Some(true);
                    }
                });
            });

        if let Some(confirmed) = answer {
            self.editor.delete(&id, |_| confirmed);
            self.pending_delete = None;
        }
    }

    fn show_chat_window(&mut self, ctx: &egui::Context) {
        if !self.chat_open || !self.role.can_use_assistant() {
            return;
        }
        let mut open = self.chat_open;
        let mut send = false;

        egui::Window::new("💬 DIU Bot")
            .open(&mut open)
            .default_size([360.0, 420.0])
            .anchor(Align2::RIGHT_BOTTOM, [-16.0, -16.0])
            .show(ctx, |ui| {
                if !self.assistant.is_configured() {
                    ui.weak("No API key configured, replies will be limited.");
                }
                egui::ScrollArea::vertical()
                    .max_height(300.0)
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        if self.chat.messages().is_empty() {
                            ui.weak("Ask about routes, stops and timings.");
                        }
                        for message in self.chat.messages() {
                            let (who, color) = match message.role {
                                ChatRole::User => ("You", Color32::LIGHT_BLUE),
                                ChatRole::Model => ("DIU Bot", Color32::LIGHT_GREEN),
                            };
                            ui.colored_label(color, format!("{} · {}", who, DTTModels::format_time(&message.timestamp, self.tz)));
                            ui.label(&message.text);
                            ui.add_space(6.0);
                        }
                        if self.pending_reply.is_some() {
                            ui.spinner();
                        }
                    });

                ui.separator();
                ui.horizontal(|ui| {
                    let input = ui.text_edit_singleline(&mut self.chat_input);
                    let enter = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.add_enabled(self.pending_reply.is_none(), egui::Button::new("Send")).clicked() || enter {
                        send = true;
                    }
                });
            });
        self.chat_open = open;

        let query = self.chat_input.trim().to_string();
        if send && !query.is_empty() && self.pending_reply.is_none() {
            self.chat.push(ChatRole::User, query.clone());
            self.chat_input.clear();
            let assistant = self.assistant.clone();
            self.pending_reply = Some(Promise::spawn_thread("assistant", move || assistant.respond(&query)));
        }
    }

    fn show_toast(&self, ctx: &egui::Context) {
        let Some(toast) = &self.toast else {
            return;
        };
        let fill = match toast.severity {
            Severity::Success => Color32::from_rgb(16, 185, 129),
            Severity::Info => Color32::from_rgb(59, 130, 246),
        };
        egui::Area::new(egui::Id::new("toast"))
            .anchor(Align2::RIGHT_TOP, [-16.0, 56.0])
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).fill(fill).show(ui, |ui| {
                    ui.label(RichText::new(&toast.message).color(Color32::WHITE).strong());
                });
            });
    }
}

impl eframe::App for DTTApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_notifications();
        self.check_reply();

        // The store changes every tick, keep the map moving
        ctx.request_repaint_after(Duration::from_millis(250));

        let snapshot = self.editor.store().snapshot();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            self.show_top_bar(ui);
        });

        if self.role != Role::Driver {
            egui::TopBottomPanel::top("filter_panel").show(ctx, |ui| {
                self.show_filter_bar(ui);
            });
            egui::SidePanel::left("status_panel").min_width(180.0).show(ctx, |ui| {
                self.show_status_card(ui, &snapshot);
            });
        }

        egui::CentralPanel::default().show(ctx, |ui| match (self.role, self.current_view) {
            (Role::Driver, _) => self.show_driver_console(ui, &snapshot),
            (_, AppView::FleetList) => self.show_fleet_list(ui, &snapshot),
            (_, AppView::Map) => self.show_map(ui, &snapshot),
        });

        if self.role.can_manage_fleet() {
            self.show_form_window(ctx);
            self.show_delete_confirm(ctx);
        } else {
            self.form = None;
            self.pending_delete = None;
        }
        self.show_chat_window(ctx);
        self.show_toast(ctx);
    }
}

impl Drop for DTTApp {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }
}

// ============================================================================
// Map projection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct MapBounds {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl MapBounds {
    /// Smallest box holding every point, padded and never narrower than MIN_MAP_SPAN
    fn around(points: impl Iterator<Item = Location>) -> Self {
        let mut bounds = MapBounds {
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lng: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
        };
        for p in points {
            bounds.min_lat = bounds.min_lat.min(p.lat);
            bounds.max_lat = bounds.max_lat.max(p.lat);
            bounds.min_lng = bounds.min_lng.min(p.lng);
            bounds.max_lng = bounds.max_lng.max(p.lng);
        }
        if !bounds.min_lat.is_finite() {
            return MapBounds { min_lat: 0.0, max_lat: MIN_MAP_SPAN, min_lng: 0.0, max_lng: MIN_MAP_SPAN };
        }

        let pad = |min: f64, max: f64| {
            let span = (max - min).max(MIN_MAP_SPAN);
            let mid = (min + max) / 2.0;
            (mid - span * 0.55, mid + span * 0.55)
        };
        let (min_lat, max_lat) = pad(bounds.min_lat, bounds.max_lat);
        let (min_lng, max_lng) = pad(bounds.min_lng, bounds.max_lng);
        MapBounds { min_lat, max_lat, min_lng, max_lng }
    }

    /// North is up
    fn project(&self, location: Location, rect: Rect) -> Pos2 {
        let x = (location.lng - self.min_lng) / (self.max_lng - self.min_lng);
        let y = (location.lat - self.min_lat) / (self.max_lat - self.min_lat);
        Pos2::new(
            rect.left() + x as f32 * rect.width(),
            rect.bottom() - y as f32 * rect.height(),
        )
    }
}

fn route_color(routes: &[Route], route_id: &str) -> Color32 {
    let (r, g, b) = DTTModels::parse_hex_color(&DTTModels::get_route_color(route_id, routes));
    Color32::from_rgb(r, g, b)
}

fn status_color(status: BusStatus) -> Color32 {
    match status {
        BusStatus::Active => Color32::from_rgb(16, 185, 129),
        BusStatus::Inactive => Color32::GRAY,
        BusStatus::Maintenance => Color32::from_rgb(239, 68, 68),
    }
}

// ============================================================================
// Public API
// ============================================================================

pub fn run_gui(
    session: FleetSession,
    config: AppConfig,
    tz: Tz,
    role: Role,
    driver_bus: String,
    assistant: Assistant,
) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([800.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "DIU Transport - Smart Tracker",
        options,
        Box::new(move |cc| Ok(Box::new(DTTApp::new(cc, session, config, tz, role, driver_bus, assistant)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtt_models::DIU_LOCATION;

    #[test]
    fn projection_keeps_north_up() {
        let bounds = MapBounds::around([DIU_LOCATION, Location::new(23.90, 90.35)].into_iter());
        let rect = Rect::from_min_size(Pos2::ZERO, egui::vec2(400.0, 300.0));
        let south = bounds.project(DIU_LOCATION, rect);
        let north = bounds.project(Location::new(23.90, 90.35), rect);
        assert!(north.y < south.y);
        assert!(north.x > south.x);
        assert!(rect.contains(south) && rect.contains(north));
    }

    #[test]
    fn single_point_bounds_have_a_minimum_span() {
        let bounds = MapBounds::around(std::iter::once(DIU_LOCATION));
        assert!(bounds.max_lat - bounds.min_lat >= MIN_MAP_SPAN);
        assert!(bounds.max_lng - bounds.min_lng >= MIN_MAP_SPAN);
    }
}
