use super::ui;
use crate::core::coin::{CachedCoin, Trend};
use crate::core::sink::PresentationSink;
use crate::core::view::ViewState;
use comfy_table::{Cell, CellAlignment, Color};
use indicatif::ProgressBar;
use std::sync::{Mutex, PoisonError};

fn coin_cell(coin: &CachedCoin) -> Cell {
    let label = format!("{} {}", coin.market.name, coin.display_symbol());
    match coin.trend() {
        Trend::Up => Cell::new(label).fg(Color::Green),
        Trend::Down => Cell::new(label).fg(Color::Red),
        Trend::Unknown => Cell::new(label),
    }
}

fn add_coin_row(table: &mut comfy_table::Table, rank: usize, coin: &CachedCoin, view: &ViewState) {
    let symbol = coin.price_symbol(&view.currency_symbol);
    let held = if coin.is_held() {
        Cell::new(coin.held.quantity.normalize().to_string()).set_alignment(CellAlignment::Right)
    } else {
        Cell::new("-").fg(Color::DarkGrey).set_alignment(CellAlignment::Right)
    };

    table.add_row(vec![
        Cell::new(rank).set_alignment(CellAlignment::Right),
        coin_cell(coin),
        ui::format_optional_cell(coin.market.current_price, |p| ui::format_money(&symbol, p)),
        ui::change_cell(coin.market.price_change_percentage_24h),
        ui::format_optional_cell(coin.sparkline_range(), |(lo, hi)| {
            format!("{lo:.2} - {hi:.2}")
        }),
        ui::format_optional_cell(coin.market.market_cap, ui::compact_number),
        held,
        ui::format_optional_cell(
            coin.holding_value_in(&view.currency).filter(|_| coin.is_held()),
            |v| ui::format_money(&symbol, v),
        ),
    ]);
}

fn market_table(coins: &[&CachedCoin], view: &ViewState) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("#"),
        ui::header_cell("Coin"),
        ui::header_cell("Price"),
        ui::header_cell("24h %"),
        ui::header_cell("7d Range"),
        ui::header_cell("Market Cap"),
        ui::header_cell("Holding"),
        ui::header_cell("Value"),
    ]);
    for (i, coin) in coins.iter().enumerate() {
        add_coin_row(&mut table, i + 1, coin, view);
    }
    table
}

fn footer(view: &ViewState) -> String {
    let status_style = if view.status_message.starts_with("Error") {
        ui::StyleType::Error
    } else {
        ui::StyleType::Subtle
    };
    format!(
        "\n\nPortfolio Total ({}): {}\n{}",
        ui::style_text(&view.currency.to_uppercase(), ui::StyleType::TotalLabel),
        ui::style_text(
            &ui::format_money(&view.currency_symbol, view.portfolio_total),
            ui::StyleType::TotalValue
        ),
        ui::style_text(&view.status_message, status_style)
    )
}

/// Renders the filtered market list with the portfolio total below it.
pub fn render_view(view: &ViewState) -> String {
    let title = if view.search_text.trim().is_empty() {
        format!("Top coins ({})", view.currency.to_uppercase())
    } else {
        format!(
            "Top coins ({}) matching \"{}\"",
            view.currency.to_uppercase(),
            view.search_text.trim()
        )
    };
    let mut output = format!("{}\n\n", ui::style_text(&title, ui::StyleType::Title));

    if view.coins.is_empty() {
        output.push_str(&ui::style_text("No coins to show", ui::StyleType::Subtle));
    } else {
        let coins: Vec<&CachedCoin> = view.coins.iter().collect();
        output.push_str(&market_table(&coins, view).to_string());
    }
    output.push_str(&footer(view));
    output
}

/// Renders only the coins with a holding.
pub fn render_holdings(view: &ViewState) -> String {
    let mut output = format!(
        "{}\n\n",
        ui::style_text("Portfolio", ui::StyleType::Title)
    );
    let held: Vec<&CachedCoin> = view.holdings().collect();
    if held.is_empty() {
        output.push_str(&ui::style_text(
            "No holdings yet. Add one with `coinpulse hold <coin-id> <quantity>`",
            ui::StyleType::Subtle,
        ));
    } else {
        output.push_str(&market_table(&held, view).to_string());
    }
    output.push_str(&footer(view));
    output
}

/// Draws views on the terminal: a spinner while loading and, in live mode, the
/// full table after every settled update.
pub struct TerminalSink {
    live: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalSink {
    /// Sink that only shows progress. The caller prints the final view.
    pub fn quiet() -> Self {
        Self {
            live: false,
            spinner: Mutex::new(None),
        }
    }

    /// Sink that reprints the table whenever the view changes.
    pub fn live() -> Self {
        Self {
            live: true,
            spinner: Mutex::new(None),
        }
    }
}

impl PresentationSink for TerminalSink {
    fn render(&self, view: &ViewState) {
        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        if view.is_loading {
            if spinner.is_none() {
                *spinner = Some(ui::new_spinner(&view.status_message));
            }
            return;
        }
        if let Some(pb) = spinner.take() {
            pb.finish_and_clear();
        }
        if self.live {
            ui::print_separator();
            println!("{}", render_view(view));
        }
    }
}
