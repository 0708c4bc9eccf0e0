//! Top-level compositor
//!
//! The [`Compositor`] owns the X connection and one [`Screen`] per X screen. It acquires
//! the compositing manager selection, redirects the root's children, builds the backend
//! screens and then runs a single-threaded loop that drains X events, renders on every
//! tick and sleeps when there was nothing to do.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::composite::{ConnectionExt as _, Redirect};
use x11rb::protocol::shape::{ConnectionExt as _, SK, SO};
use x11rb::protocol::xproto::{
    Atom, ChangeWindowAttributesAux, ClipOrdering, ConnectionExt as _, CreateWindowAux,
    EventMask, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::CURRENT_TIME;

use crate::config::{CompositorConfig, CompositorMode};
use crate::error::CompositorError;
use crate::opengl::OpenGlScreen;
use crate::screen::{HeadMode, Screen};
use crate::tick_tracker::TickTracker;
use crate::x11::{XConnection, XErrorPolicy};
use crate::xrender::XRenderScreen;

/// How long the loop sleeps when no event arrived and no frame was due.
const IDLE_SLEEP: Duration = Duration::from_micros(500);

/// Name of the selection that marks the compositing manager of screen `screen_number`.
pub fn cm_selection_name(screen_number: usize) -> String {
    format!("_NET_WM_CM_S{}", screen_number)
}

/// The window whose owning screen should receive `event`.
///
/// Substructure events are routed by the window they were reported on, which is the root
/// for every top-level change. Returns `None` for events no screen handles.
pub fn event_window(event: &Event) -> Option<Window> {
    match event {
        Event::CirculateNotify(e) => Some(e.event),
        Event::ConfigureNotify(e) => Some(e.event),
        Event::CreateNotify(e) => Some(e.parent),
        Event::DestroyNotify(e) => Some(e.event),
        Event::Expose(e) => Some(e.window),
        Event::MapNotify(e) => Some(e.event),
        Event::UnmapNotify(e) => Some(e.event),
        Event::PropertyNotify(e) => Some(e.window),
        Event::ReparentNotify(e) => Some(e.event),
        Event::DamageNotify(e) => Some(e.drawable),
        Event::ShapeNotify(e) => Some(e.affected_window),
        _ => None,
    }
}

pub struct Compositor {
    conn: Rc<XConnection>,
    screens: Vec<Box<dyn Screen>>,
    render_timer: TickTracker,
    done: Arc<AtomicBool>,
}

impl Compositor {
    /// Connects to the display and takes over compositing on every screen.
    pub fn new(config: &CompositorConfig, done: Arc<AtomicBool>) -> Result<Self> {
        info!("🏗️ Initializing fbcompose in {:?} mode...", config.general.mode);

        let policy = if config.x11.ignore_errors {
            XErrorPolicy::Ignore
        } else {
            XErrorPolicy::Log
        };
        let display = config.general.display.as_deref();
        let mut conn = XConnection::connect(display, policy, config.x11.synchronize)
            .context("Failed to open the X display")?;
        conn.init_extensions()?;
        let conn = Rc::new(conn);

        let mode = config.general.mode;
        let search_paths = config.search_paths()?;
        let mut screens: Vec<Box<dyn Screen>> = Vec::new();

        for screen_number in 0..conn.screen_count() {
            let root = conn.conn().setup().roots[screen_number].root;
            let selection_owner = Self::acquire_cm_selection(&conn, screen_number, root)?;

            let redirect = if mode == CompositorMode::ServerAuto {
                Redirect::AUTOMATIC
            } else {
                Redirect::MANUAL
            };
            conn.conn()
                .composite_redirect_subwindows(root, redirect)
                .context("Failed to redirect the root window's children")?;
            conn.conn().change_window_attributes(
                root,
                &ChangeWindowAttributesAux::new().event_mask(
                    EventMask::SUBSTRUCTURE_NOTIFY
                        | EventMask::STRUCTURE_NOTIFY
                        | EventMask::EXPOSURE
                        | EventMask::PROPERTY_CHANGE,
                ),
            )?;

            if mode == CompositorMode::ServerAuto {
                debug!("Screen {}: server-side compositing", screen_number);
                continue;
            }

            let overlay = Self::prepare_overlay(&conn, root)?;
            let mut screen: Box<dyn Screen> = match mode {
                CompositorMode::OpenGl => Box::new(
                    OpenGlScreen::new(
                        conn.clone(),
                        screen_number,
                        overlay,
                        display,
                        &config.opengl,
                        search_paths.clone(),
                    )
                    .with_context(|| format!("Failed to set up OpenGL on screen {}", screen_number))?,
                ),
                CompositorMode::XRender => Box::new(
                    XRenderScreen::new(
                        conn.clone(),
                        screen_number,
                        overlay,
                        &config.xrender,
                        search_paths.clone(),
                    )
                    .with_context(|| format!("Failed to set up XRender on screen {}", screen_number))?,
                ),
                CompositorMode::ServerAuto => continue,
            };
            screen.add_to_ignore_list(overlay);
            screen.add_to_ignore_list(selection_owner);
            screens.push(screen);
        }

        let specs = config.plugin_specs()?;
        let head_mode = if conn.has_xinerama() {
            HeadMode::Xinerama
        } else {
            HeadMode::Single
        };
        for screen in &mut screens {
            screen.init_plugins(&specs)?;
            screen.init_windows()?;
            screen.update_heads(head_mode)?;
        }
        conn.flush()?;

        info!("✅ Compositing {} screen(s)", conn.screen_count());
        Ok(Self {
            conn,
            screens,
            render_timer: TickTracker::with_rate(config.general.refresh_rate),
            done,
        })
    }

    /// Runs until the done flag is raised. A frame in progress always completes.
    pub fn run(&mut self) -> Result<()> {
        info!("🎬 Starting fbcompose event loop");
        self.render_timer.start();

        while !self.done.load(Ordering::SeqCst) {
            let mut busy = false;

            while let Some(event) = self.conn.conn().poll_for_event()? {
                busy = true;
                self.dispatch(&event)?;
                if self.conn.is_synchronous() {
                    self.conn.sync()?;
                }
            }

            if self.render_timer.new_elapsed_ticks() > 0 {
                busy = true;
                for screen in &mut self.screens {
                    screen.render_screen()?;
                    screen.clear_screen_damage();
                }
                self.conn.flush()?;
            }

            if !busy {
                std::thread::sleep(IDLE_SLEEP);
            }
        }

        self.render_timer.stop();
        info!("🛑 fbcompose event loop finished");
        Ok(())
    }

    fn dispatch(&mut self, event: &Event) -> Result<()> {
        if let Event::Error(error) = event {
            self.conn.handle_error(error);
            return Ok(());
        }

        let Some(window) = event_window(event) else {
            trace!("Ignoring event {:?}", event);
            return Ok(());
        };

        match self.screens.iter_mut().find(|s| s.manages(window)) {
            Some(screen) => screen
                .handle_event(event)
                .with_context(|| format!("Failed to handle event for window 0x{:x}", window)),
            None => {
                trace!("No screen manages window 0x{:x}", window);
                Ok(())
            }
        }
    }

    /// Claims `_NET_WM_CM_S<n>` with a fresh unmapped window, failing if another
    /// compositing manager holds it.
    fn acquire_cm_selection(conn: &XConnection, screen_number: usize, root: Window) -> Result<Window> {
        let name = cm_selection_name(screen_number);
        let selection: Atom = conn.conn().intern_atom(false, name.as_bytes())?.reply()?.atom;

        let owner = conn.conn().get_selection_owner(selection)?.reply()?.owner;
        if owner != x11rb::NONE {
            return Err(CompositorError::CompositorRunning {
                screen: screen_number,
            }
            .into());
        }

        let window = conn.conn().generate_id()?;
        conn.conn().create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            x11rb::COPY_FROM_PARENT,
            &CreateWindowAux::new().override_redirect(1),
        )?;
        conn.conn().set_selection_owner(window, selection, CURRENT_TIME)?;

        let owner = conn.conn().get_selection_owner(selection)?.reply()?.owner;
        if owner != window {
            warn!("Lost the race for {}", name);
            return Err(CompositorError::CompositorRunning {
                screen: screen_number,
            }
            .into());
        }
        debug!("Acquired {} with window 0x{:x}", name, window);
        Ok(window)
    }

    /// Fetches the composite overlay window and makes it transparent to input.
    fn prepare_overlay(conn: &XConnection, root: Window) -> Result<Window> {
        let overlay = conn
            .conn()
            .composite_get_overlay_window(root)?
            .reply()
            .context("Failed to get the composite overlay window")?
            .overlay_win;
        conn.conn()
            .shape_rectangles(SO::SET, SK::INPUT, ClipOrdering::UNSORTED, overlay, 0, 0, &[])?;
        conn.conn().change_window_attributes(
            overlay,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::EXPOSURE),
        )?;
        Ok(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::protocol::damage::NotifyEvent as DamageNotifyEvent;
    use x11rb::protocol::xproto::{CreateNotifyEvent, MapNotifyEvent, PropertyNotifyEvent};

    #[test]
    fn test_cm_selection_name() {
        assert_eq!(cm_selection_name(0), "_NET_WM_CM_S0");
        assert_eq!(cm_selection_name(2), "_NET_WM_CM_S2");
    }

    #[test]
    fn test_substructure_events_route_by_reporting_window() {
        let map = Event::MapNotify(MapNotifyEvent {
            event: 0x100,
            window: 0x2a,
            ..Default::default()
        });
        assert_eq!(event_window(&map), Some(0x100));

        let create = Event::CreateNotify(CreateNotifyEvent {
            parent: 0x100,
            window: 0x2b,
            ..Default::default()
        });
        assert_eq!(event_window(&create), Some(0x100));
    }

    #[test]
    fn test_window_events_route_by_window() {
        let property = Event::PropertyNotify(PropertyNotifyEvent {
            window: 0x2a,
            ..Default::default()
        });
        assert_eq!(event_window(&property), Some(0x2a));

        let damage = Event::DamageNotify(DamageNotifyEvent {
            drawable: 0x2c,
            ..Default::default()
        });
        assert_eq!(event_window(&damage), Some(0x2c));
    }

    #[test]
    fn test_unrelated_events_are_not_routed() {
        assert_eq!(event_window(&Event::Unknown(vec![0; 32])), None);
    }
}
