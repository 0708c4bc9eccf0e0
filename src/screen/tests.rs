use std::cell::{Cell, RefCell};
use std::rc::Rc;

use x11rb::protocol::xproto::{Place, Property, Window};

use super::*;
use crate::error::PluginError;
use crate::plugin::{PluginSearchPaths, PluginType};
use crate::window::BaseCompWindow;
use crate::x11::testing::{attributes, test_atoms, FakeServer, ROOT};

struct TestWindow(BaseCompWindow);

impl CompWindow for TestWindow {
    fn base(&self) -> &BaseCompWindow {
        &self.0
    }

    fn base_mut(&mut self) -> &mut BaseCompWindow {
        &mut self.0
    }
}

type TestPlugin = dyn BasePlugin<TestWindow>;

thread_local! {
    static EVENTS: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn record(event: String) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

fn take_events() -> Vec<String> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

struct Recorder;

impl BasePlugin<TestWindow> for Recorder {
    fn plugin_name(&self) -> &str {
        "recorder"
    }

    fn window_created(&mut self, _screen: &ScreenInfo, window: &TestWindow) {
        record(format!("created {:x}", window.0.id()));
    }

    fn window_mapped(&mut self, _screen: &ScreenInfo, window: &TestWindow) {
        record(format!("mapped {:x}", window.0.id()));
    }

    fn window_unmapped(&mut self, _screen: &ScreenInfo, window: &TestWindow) {
        record(format!("unmapped {:x}", window.0.id()));
    }

    fn window_destroyed(&mut self, _screen: &ScreenInfo, window: &TestWindow) {
        record(format!("destroyed {:x}", window.0.id()));
    }

    fn root_property_changed(&mut self, _screen: &ScreenInfo, property: Atom) {
        record(format!("root {}", property));
    }
}

fn create_recorder(_screen: &ScreenInfo, _args: &[String]) -> std::result::Result<Box<TestPlugin>, PluginError> {
    Ok(Box::new(Recorder))
}

fn create_rejecting(_screen: &ScreenInfo, args: &[String]) -> std::result::Result<Box<TestPlugin>, PluginError> {
    Err(PluginError::InvalidArguments {
        name: "rejecting".to_string(),
        reason: format!("{} arguments", args.len()),
    })
}

fn screen_with(server: &Rc<FakeServer>) -> BaseScreen<TestWindow, TestPlugin> {
    let mut manager = PluginManager::new(
        PluginType::XRender,
        PluginSearchPaths {
            build_dir: None,
            user_dir: None,
            prefix_dir: None,
        },
    );
    manager.register_builtin("recorder", create_recorder);
    manager.register_builtin("rejecting", create_rejecting);

    let server: Rc<dyn XServer> = server.clone();
    BaseScreen::new(
        server,
        ScreenInfo::new(0, ROOT, 1920, 1080, test_atoms()),
        manager,
        Box::new(|server: &Rc<dyn XServer>, window: Window| Ok(TestWindow(BaseCompWindow::new(server.clone(), window)?))),
    )
    .unwrap()
}

fn order(screen: &BaseScreen<TestWindow, TestPlugin>) -> Vec<Window> {
    screen.windows().iter().map(|w| w.0.id()).collect()
}

fn three_windows() -> (Rc<FakeServer>, BaseScreen<TestWindow, TestPlugin>) {
    let server = Rc::new(FakeServer::new());
    server.add_window(0x10, attributes(0, 0, 100, 100));
    server.add_window(0x20, attributes(50, 50, 100, 100));
    server.add_window(0x30, attributes(100, 100, 100, 100));
    let mut screen = screen_with(&server);
    screen.init_windows().unwrap();
    screen.clear_screen_damage();
    (server, screen)
}

#[test]
fn test_init_windows_tracks_children_in_stacking_order() {
    let (_server, screen) = three_windows();
    assert_eq!(order(&screen), vec![0x10, 0x20, 0x30]);
}

#[test]
fn test_circulate_untracked_window_keeps_order() {
    let (_server, mut screen) = three_windows();
    screen.circulate_window(0x99, Place::ON_TOP).unwrap();
    screen.circulate_window(0x99, Place::ON_BOTTOM).unwrap();
    assert_eq!(order(&screen), vec![0x10, 0x20, 0x30]);
    assert!(screen.damage().is_empty());
}

#[test]
fn test_circulate_moves_to_top_and_bottom() {
    let (_server, mut screen) = three_windows();
    screen.circulate_window(0x10, Place::ON_TOP).unwrap();
    assert_eq!(order(&screen), vec![0x20, 0x30, 0x10]);
    screen.circulate_window(0x30, Place::ON_BOTTOM).unwrap();
    assert_eq!(order(&screen), vec![0x30, 0x20, 0x10]);
    assert!(!screen.damage().is_empty());
}

#[test]
fn test_reconfigure_restacks_above_sibling() {
    let (_server, mut screen) = three_windows();
    screen
        .reconfigure_window(0x30, Rect::new(5, 5, 100, 100), 0, 0x10)
        .unwrap();
    assert_eq!(order(&screen), vec![0x10, 0x30, 0x20]);

    screen
        .reconfigure_window(0x20, Rect::new(5, 5, 100, 100), 0, x11rb::NONE)
        .unwrap();
    assert_eq!(order(&screen), vec![0x20, 0x10, 0x30]);
}

#[test]
fn test_reconfigure_above_untracked_sibling_goes_on_top() {
    let (_server, mut screen) = three_windows();
    screen
        .reconfigure_window(0x10, Rect::new(0, 0, 100, 100), 0, 0x99)
        .unwrap();
    assert_eq!(order(&screen), vec![0x20, 0x30, 0x10]);
}

#[test]
fn test_reconfigure_damages_old_and_new_area() {
    let (_server, mut screen) = three_windows();
    screen
        .reconfigure_window(0x10, Rect::new(500, 500, 100, 100), 0, 0x30)
        .unwrap();
    let bounds = screen.damage().bounds().unwrap();
    assert!(bounds.contains_rect(&Rect::new(0, 0, 100, 100)));
    assert!(bounds.contains_rect(&Rect::new(500, 500, 100, 100)));
    assert!(!screen.window(0x10).unwrap().0.is_resized());
}

#[test]
fn test_root_configure_resizes_screen() {
    let (_server, mut screen) = three_windows();
    screen
        .reconfigure_window(ROOT, Rect::new(0, 0, 2560, 1440), 0, x11rb::NONE)
        .unwrap();
    assert_eq!(screen.info().screen_rect(), Rect::new(0, 0, 2560, 1440));
    assert!(screen.take_resized());
    assert!(!screen.take_resized());
    assert_eq!(screen.damage().rects(), &[Rect::new(0, 0, 2560, 1440)]);
}

#[test]
fn test_create_window_is_not_duplicated() {
    let (_server, mut screen) = three_windows();
    screen.create_window(0x20).unwrap();
    assert_eq!(order(&screen), vec![0x10, 0x20, 0x30]);
}

#[test]
fn test_vanished_and_input_only_windows_are_ignored() {
    let server = Rc::new(FakeServer::new());
    let mut input_only = attributes(0, 0, 10, 10);
    input_only.class = WindowClass::INPUT_ONLY;
    server.add_window(0x40, input_only);
    let mut screen = screen_with(&server);

    screen.create_window(0x40).unwrap();
    screen.create_window(0x41).unwrap();
    assert!(screen.window(0x40).unwrap().0.is_ignored());
    assert!(screen.window(0x41).unwrap().0.is_ignored());
}

#[test]
fn test_ignore_list_suppresses_damage_and_callbacks() {
    let server = Rc::new(FakeServer::new());
    server.add_window(0x50, attributes(0, 0, 100, 100));
    let mut screen = screen_with(&server);
    screen.init_plugins(&[PluginSpec::new("recorder")]).unwrap();
    screen.add_to_ignore_list(0x50);
    screen.clear_screen_damage();
    take_events();

    screen.create_window(0x50).unwrap();
    screen.map_window(0x50).unwrap();
    screen.damage_window(0x50).unwrap();
    assert!(screen.window(0x50).unwrap().0.is_ignored());
    assert!(screen.damage().is_empty());
    assert!(take_events().is_empty());
    assert!(screen.manages(0x50));
}

#[test]
fn test_lifecycle_callbacks_reach_plugins() {
    let server = Rc::new(FakeServer::new());
    let mut unmapped = attributes(0, 0, 100, 100);
    unmapped.viewable = false;
    server.add_window(0x60, unmapped);
    let mut screen = screen_with(&server);
    screen.init_plugins(&[PluginSpec::new("recorder")]).unwrap();
    take_events();

    screen.create_window(0x60).unwrap();
    screen.map_window(0x60).unwrap();
    screen.unmap_window(0x60).unwrap();
    screen.destroy_window(0x60).unwrap();
    assert_eq!(
        take_events(),
        vec!["created 60", "mapped 60", "unmapped 60", "destroyed 60"]
    );
    assert!(!screen.is_tracked(0x60));
}

#[test]
fn test_reparent_adds_and_removes() {
    let (server, mut screen) = three_windows();
    server.windows.borrow_mut().insert(0x70, attributes(0, 0, 10, 10));

    screen.reparent_window(0x70, ROOT).unwrap();
    assert_eq!(order(&screen), vec![0x10, 0x20, 0x30, 0x70]);

    screen.reparent_window(0x20, 0x1234).unwrap();
    assert_eq!(order(&screen), vec![0x10, 0x30, 0x70]);

    // Reparenting an untracked window away from the root is a no-op.
    screen.reparent_window(0x99, 0x1234).unwrap();
    assert_eq!(order(&screen).len(), 3);
}

#[test]
fn test_damage_then_clear_is_empty() {
    let (_server, mut screen) = three_windows();
    screen.damage_screen_area(Rect::new(0, 0, 10, 10));
    screen.damage_screen_area(Rect::new(500, 500, 10, 10));
    assert_eq!(screen.damage().rects().len(), 2);
    screen.clear_screen_damage();
    assert!(screen.damage().is_empty());
}

#[test]
fn test_damage_is_clipped_to_screen() {
    let (_server, mut screen) = three_windows();
    screen.damage_screen_area(Rect::new(1900, 1000, 100, 100));
    screen.damage_screen_area(Rect::new(-50, -50, 10, 10));
    assert_eq!(screen.damage().rects(), &[Rect::new(1900, 1000, 20, 80)]);
}

#[test]
fn test_opacity_change_redamages_window() {
    let (server, mut screen) = three_windows();
    let atoms = test_atoms();
    server.set_property(0x20, atoms._NET_WM_WINDOW_OPACITY, vec![0]);
    screen
        .update_window_property(0x20, atoms._NET_WM_WINDOW_OPACITY, Property::NEW_VALUE)
        .unwrap();
    assert_eq!(screen.window(0x20).unwrap().0.opacity(), 0);
    assert_eq!(screen.damage().rects(), &[Rect::new(50, 50, 100, 100)]);
}

#[test]
fn test_root_properties_update_cache() {
    let (server, mut screen) = three_windows();
    screen.init_plugins(&[PluginSpec::new("recorder")]).unwrap();
    take_events();
    let atoms = test_atoms();

    server.set_property(ROOT, atoms._NET_ACTIVE_WINDOW, vec![0x20]);
    server.set_property(ROOT, atoms._NET_CURRENT_DESKTOP, vec![2]);
    server.set_property(ROOT, atoms._NET_NUMBER_OF_DESKTOPS, vec![4]);
    server.set_property(ROOT, atoms._FBCOMPOSE_CURRENT_ICONBAR_ITEM, vec![0x30]);
    for atom in [
        atoms._NET_ACTIVE_WINDOW,
        atoms._NET_CURRENT_DESKTOP,
        atoms._NET_NUMBER_OF_DESKTOPS,
        atoms._FBCOMPOSE_CURRENT_ICONBAR_ITEM,
    ] {
        screen
            .update_window_property(ROOT, atom, Property::NEW_VALUE)
            .unwrap();
    }

    let info = screen.info();
    assert_eq!(info.active_window, 0x20);
    assert_eq!(info.current_workspace, 2);
    assert_eq!(info.workspace_count, 4);
    assert_eq!(info.current_iconbar_item, 0x30);
    assert_eq!(take_events().len(), 4);

    // Root properties the screen does not cache are not forwarded.
    screen
        .update_window_property(ROOT, atoms._NET_WM_WINDOW_TYPE, Property::NEW_VALUE)
        .unwrap();
    assert!(take_events().is_empty());
}

#[test]
fn test_reconfigure_rect_damages_both_outlines() {
    let (server, mut screen) = three_windows();
    let atoms = test_atoms();
    server.set_property(ROOT, atoms._FBCOMPOSE_RECONFIGURE_RECT, vec![300, 300, 50, 50]);
    screen
        .update_window_property(ROOT, atoms._FBCOMPOSE_RECONFIGURE_RECT, Property::NEW_VALUE)
        .unwrap();
    assert_eq!(screen.info().reconfigure_rect, Rect::new(300, 300, 50, 50));
    assert_eq!(screen.damage().rects(), &[Rect::new(300, 300, 50, 50)]);

    screen.clear_screen_damage();
    server.set_property(ROOT, atoms._FBCOMPOSE_RECONFIGURE_RECT, vec![]);
    screen
        .update_window_property(ROOT, atoms._FBCOMPOSE_RECONFIGURE_RECT, Property::DELETE)
        .unwrap();
    assert!(screen.info().reconfigure_rect.is_empty());
    assert_eq!(screen.damage().rects(), &[Rect::new(300, 300, 50, 50)]);
}

#[test]
fn test_background_property_order_and_change_flag() {
    let server = Rc::new(FakeServer::new());
    let atoms = test_atoms();
    server.set_property(ROOT, atoms._XSETROOT_ID, vec![0x777]);
    let mut screen = screen_with(&server);
    assert_eq!(
        screen.info().root_pixmap,
        RootPixmapSource::Property {
            atom: atoms._XSETROOT_ID,
            pixmap: 0x777
        }
    );
    assert!(screen.take_root_pixmap_changed());
    assert!(!screen.take_root_pixmap_changed());

    server.set_property(ROOT, atoms._XROOTPMAP_ID, vec![0x888]);
    screen
        .update_window_property(ROOT, atoms._XROOTPMAP_ID, Property::NEW_VALUE)
        .unwrap();
    assert_eq!(screen.info().root_pixmap.pixmap(), Some(0x888));
    assert!(screen.take_root_pixmap_changed());
}

#[test]
fn test_failed_plugin_init_leaves_no_plugins() {
    let (_server, mut screen) = three_windows();
    let specs = vec![
        PluginSpec::new("recorder"),
        "rejecting a b".parse().unwrap(),
    ];
    let err = screen.init_plugins(&specs).unwrap_err();
    assert!(matches!(
        err,
        crate::error::CompositorError::Plugin(PluginError::InvalidArguments { .. })
    ));
    assert!(screen.plugin_manager().plugins().is_empty());

    let err = screen
        .init_plugins(&[PluginSpec::new("fbcompose-missing")])
        .unwrap_err();
    assert!(matches!(
        err,
        crate::error::CompositorError::Plugin(PluginError::NotFound { .. })
    ));
    assert!(screen.plugin_manager().plugins().is_empty());
}

#[test]
fn test_heads() {
    let (server, mut screen) = three_windows();
    screen.update_heads(HeadMode::Xinerama).unwrap();
    assert_eq!(screen.info().heads, vec![Rect::new(0, 0, 1920, 1080)]);

    *server.heads.borrow_mut() = Some(vec![Rect::new(0, 0, 960, 1080), Rect::new(960, 0, 960, 1080)]);
    screen.update_heads(HeadMode::Xinerama).unwrap();
    assert_eq!(screen.info().heads.len(), 2);
    assert_eq!(screen.info().head_at(1000, 10), Rect::new(960, 0, 960, 1080));

    screen.update_heads(HeadMode::Single).unwrap();
    assert_eq!(screen.info().heads, vec![Rect::new(0, 0, 1920, 1080)]);
}

#[test]
fn test_background_refreshed_once_per_pixmap_change() {
    let server = Rc::new(FakeServer::new());
    let atoms = test_atoms();
    server.set_property(ROOT, atoms._XROOTPMAP_ID, vec![0x500]);
    let mut screen = screen_with(&server);

    let uploads = Cell::new(0);
    let upload = |info: &ScreenInfo| {
        assert_eq!(info.root_pixmap.pixmap(), Some(0x500));
        uploads.set(uploads.get() + 1);
        Ok(())
    };

    assert!(refresh_background(&mut screen, upload).unwrap());
    assert!(!refresh_background(&mut screen, upload).unwrap());
    assert_eq!(uploads.get(), 1);

    screen
        .update_window_property(ROOT, atoms._XROOTPMAP_ID, Property::NEW_VALUE)
        .unwrap();
    assert!(refresh_background(&mut screen, upload).unwrap());
    assert_eq!(uploads.get(), 2);
}
