use anyhow::Result;
use askpop_core::CursorMove;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::{App, InputMode};
use crate::tui::AppEvent;

/// Lines moved per wheel notch or page key
const SCROLL_STEP: u16 = 3;

/// Apply one event. Returns true when the screen should be redrawn.
pub fn handle_event(app: &mut App, event: AppEvent) -> Result<bool> {
    let redraw = match event {
        AppEvent::Key(key) => {
            handle_key(app, key);
            true
        }
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => {
            app.paste_text(&text);
            true
        }
        AppEvent::Resize(_, _) => true,
        AppEvent::Tick => app.tick(),
        AppEvent::Session(event) => {
            app.handle_session_event(event);
            true
        }
    };
    Ok(redraw)
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    if ctrl && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return;
    }
    if ctrl && key.code == KeyCode::Char(' ') {
        app.toggle_popup();
        return;
    }

    if !app.is_popup_open() {
        handle_backdrop(app, key);
        return;
    }

    match app.input_mode {
        InputMode::AttachPath => handle_attach_path(app, key),
        InputMode::Prompt => handle_popup(app, key),
    }
}

fn handle_backdrop(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Enter | KeyCode::Char(' ') => app.open_popup(),
        _ => {}
    }
}

fn handle_attach_path(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_attach(),
        KeyCode::Enter => app.finish_attach(),
        KeyCode::Backspace => {
            app.path_input.pop();
        }
        KeyCode::Char(c) => app.path_input.push(c),
        _ => {}
    }
}

fn handle_popup(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    if key.code == KeyCode::Esc {
        app.close_popup();
        return;
    }

    if ctrl {
        match key.code {
            KeyCode::Char('n') => app.new_chat(),
            KeyCode::Char('r') => app.toggle_history(),
            KeyCode::Char('s') => app.stop(),
            KeyCode::Char('o') => app.begin_attach(),
            KeyCode::Char('v') => app.paste_clipboard(),
            KeyCode::Char('x') => app.remove_image(),
            KeyCode::Char('l') => app.toggle_listening(),
            KeyCode::Char('y') => app.copy_response(),
            _ => {}
        }
        return;
    }

    let showing_history = app.session.as_ref().map(|s| s.is_showing_history()).unwrap_or(false);
    if showing_history {
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => app.history_nav_down(),
            KeyCode::Up | KeyCode::Char('k') => app.history_nav_up(),
            KeyCode::Enter => app.load_selected_history(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::PageDown => app.scroll_response_down(SCROLL_STEP),
        KeyCode::PageUp => app.scroll_response_up(SCROLL_STEP),
        KeyCode::Enter
            if key.modifiers.intersects(KeyModifiers::SHIFT | KeyModifiers::ALT) =>
        {
            edit(app, |s| s.type_char('\n'));
        }
        KeyCode::Enter => app.submit(),
        KeyCode::Backspace => edit(app, |s| s.backspace()),
        KeyCode::Delete => edit(app, |s| s.delete()),
        KeyCode::Left => edit(app, |s| s.move_cursor(CursorMove::Left)),
        KeyCode::Right => edit(app, |s| s.move_cursor(CursorMove::Right)),
        KeyCode::Home => edit(app, |s| s.move_cursor(CursorMove::Home)),
        KeyCode::End => edit(app, |s| s.move_cursor(CursorMove::End)),
        KeyCode::Char(c) => edit(app, |s| s.type_char(c)),
        _ => {}
    }
}

fn edit(app: &mut App, f: impl FnOnce(&mut askpop_core::PopupSession)) {
    if let Some(session) = app.session.as_mut() {
        f(session);
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) -> bool {
    let x = mouse.column;
    let y = mouse.row;

    let Some(popup) = app.popup_area else {
        return false;
    };
    let in_popup = point_in_rect(x, y, popup);

    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            if !in_popup {
                // Click on the backdrop dismisses
                app.close_popup();
                return true;
            }
            if let Some(session) = app.session.as_mut() {
                if session.pointer_down(i32::from(x), i32::from(y)) {
                    return false;
                }
            }
            if let Some(area) = app.history_area {
                if point_in_rect(x, y, area) {
                    let row = usize::from(y - area.y) + app.history_state.offset();
                    let len = app.session.as_ref().map(|s| s.history().len()).unwrap_or(0);
                    if row < len {
                        app.history_state.select(Some(row));
                        app.load_history_entry(row);
                        return true;
                    }
                    return false;
                }
            }
            false
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            match app.session.as_mut() {
                Some(session) if session.is_dragging() => {
                    session.pointer_move(i32::from(x), i32::from(y));
                    true
                }
                _ => false,
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            if let Some(session) = app.session.as_mut() {
                session.pointer_up();
            }
            false
        }
        MouseEventKind::ScrollDown if in_popup => {
            if app.history_area.is_some() {
                app.history_nav_down();
            } else {
                app.scroll_response_down(SCROLL_STEP);
            }
            true
        }
        MouseEventKind::ScrollUp if in_popup => {
            if app.history_area.is_some() {
                app.history_nav_up();
            } else {
                app.scroll_response_up(SCROLL_STEP);
            }
            true
        }
        _ => false,
    }
}
