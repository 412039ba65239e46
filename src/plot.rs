//! Interactive Plot Module
//!
//! Renders projected points joined with their annotations as a single
//! interactive Plotly page.
//!
//! # Layout (4 rows × 2 columns)
//! ```text
//! Strand              | Clusters
//! Prediction tool     | MOG number
//! Conservation ratio  | Ratio histogram
//! Length              | Length histogram
//! ```
//! Marker size/opacity sliders restyle scatter traces only. The embedded
//! script adds SVG / selected-ID export buttons, group-aware legend clicks
//! and synchronised zooming across the scatter panels.

use anyhow::{Context, Result};
use palette::{Hsl, IntoColor, Srgb};
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;

use crate::annotate::AnnotationTable;
use crate::projection::Coordinate;

/// Label used for missing categorical values.
pub const NA: &str = "NA";

const NA_COLOR: &str = "gray";
const BAND_OFFSET_FRAC: f64 = 0.12;
const BAND_THICKNESS_FRAC: f64 = 0.03;
const HORIZONTAL_SPACING: f64 = 0.03;
const VERTICAL_SPACING: f64 = 0.05;

const HOVER: &str = "<b>%{customdata[0]}</b><br>MOG #: %{customdata[1]}<br>%{customdata[2]}<extra></extra>";
const HOVER_LENGTH: &str =
    "<b>%{customdata[0]}</b><br>MOG #: %{customdata[1]}<br>%{customdata[2]}<br>Length: %{customdata[3]}<extra></extra>";

// ============================================================================
// Options
// ============================================================================

/// Rendering options.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub title: String,
    /// Plotly.js script URL.
    pub plotly_src: String,
    pub marker_size: u32,
    pub opacity: f64,
    pub bins: usize,
    pub height: u32,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            title: "Embedding map".to_string(),
            plotly_src: "https://cdn.plot.ly/plotly-2.35.2.min.js".to_string(),
            marker_size: 14,
            opacity: 0.8,
            bins: 50,
            height: 1950,
        }
    }
}

// ============================================================================
// Points
// ============================================================================

/// A projected point with the annotation fields the plot displays.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotPoint {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub strand: String,
    pub cluster: String,
    pub tool: String,
    pub mog_number: String,
    pub mog_text: String,
    pub ratio: f64,
    pub length: Option<f64>,
}

/// Joins coordinates with annotation rows by ID, also matching sanitized
/// coordinate IDs. Points without a row get `NA` categories, ratio 0 and
/// unknown length.
pub fn join_points(coords: &[Coordinate], table: &AnnotationTable) -> Vec<PlotPoint> {
    let or_na = |v: Option<&String>| v.cloned().unwrap_or_else(|| NA.to_string());

    coords
        .iter()
        .map(|c| match table.resolve(&c.id) {
            Some(row) => PlotPoint {
                id: c.id.clone(),
                x: c.x,
                y: c.y,
                strand: or_na(row.strand.as_ref()),
                cluster: or_na(row.cluster_id.as_ref()),
                tool: or_na(row.prediction_tool.as_ref()),
                mog_number: or_na(row.mog_number.as_ref()),
                mog_text: row.mog_text.clone().unwrap_or_default(),
                ratio: if row.ratio.is_finite() { row.ratio } else { 0.0 },
                length: row.length.map(|l| l as f64),
            },
            None => PlotPoint {
                id: c.id.clone(),
                x: c.x,
                y: c.y,
                strand: NA.to_string(),
                cluster: NA.to_string(),
                tool: NA.to_string(),
                mog_number: NA.to_string(),
                mog_text: String::new(),
                ratio: 0.0,
                length: None,
            },
        })
        .collect()
}

// ============================================================================
// Colors
// ============================================================================

/// Generates `n` visually distinct `rgb(r,g,b)` colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            format!(
                "rgb({},{},{})",
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8
            )
        })
        .collect()
}

/// Ordered category → colour assignments for one panel.
#[derive(Debug, Clone, Default)]
pub struct CategoryPalette {
    entries: Vec<(String, String)>,
}

impl CategoryPalette {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, c)| (k.into(), c.into())).collect(),
        }
    }

    /// Generated colours for the sorted non-NA values, gray for NA.
    /// NA comes first when `na_first`, last otherwise.
    pub fn generated(values: &BTreeSet<String>, na_first: bool) -> Self {
        let named: Vec<&String> = values.iter().filter(|v| v.as_str() != NA).collect();
        let colors = generate_palette(named.len());
        let mut entries: Vec<(String, String)> = named
            .into_iter()
            .cloned()
            .zip(colors)
            .collect();
        let na = (NA.to_string(), NA_COLOR.to_string());
        if na_first {
            entries.insert(0, na);
        } else {
            entries.push(na);
        }
        Self { entries }
    }

    /// Appends generated colours for values not yet in the palette.
    pub fn extend_with(&mut self, values: &BTreeSet<String>) {
        let missing: Vec<&String> = values
            .iter()
            .filter(|v| !self.entries.iter().any(|(k, _)| k == *v))
            .collect();
        let colors = generate_palette(missing.len());
        for (value, color) in missing.into_iter().zip(colors) {
            let color = if value == NA { NA_COLOR.to_string() } else { color };
            self.entries.push((value.clone(), color));
        }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn color_for(&self, value: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == value).map(|(_, c)| c.as_str())
    }
}

fn strand_palette() -> CategoryPalette {
    CategoryPalette::from_entries([("-", "blue"), ("+", "red"), (NA, "green")])
}

fn tool_palette() -> CategoryPalette {
    CategoryPalette::from_entries([("Getorf", "purple"), ("Prodigal", "orange"), ("Expe", "green")])
}

// ============================================================================
// Histogram
// ============================================================================

/// Equal-width histogram with numpy semantics: bins span [min, max], the last
/// bin is closed, a degenerate range is widened by ±0.5 and empty input uses [0, 1].
pub fn histogram(values: &[f64], bins: usize) -> (Vec<usize>, Vec<f64>) {
    let bins = bins.max(1);
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();

    let (mut lo, mut hi) = if finite.is_empty() {
        (0.0, 1.0)
    } else {
        let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    };
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }

    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();

    let mut counts = vec![0usize; bins];
    for v in finite {
        let idx = (((v - lo) / (hi - lo)) * bins as f64).floor() as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    (counts, edges)
}

/// Bin centres from edges.
pub fn bin_centers(edges: &[f64]) -> Vec<f64> {
    edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

// ============================================================================
// Figure
// ============================================================================

/// Axis reference names for a 1-based subplot index.
fn axis_refs(subplot: usize) -> (String, String) {
    if subplot == 1 {
        ("x".to_string(), "y".to_string())
    } else {
        (format!("x{}", subplot), format!("y{}", subplot))
    }
}

fn layout_axis_key(axis: &str, subplot: usize) -> String {
    if subplot == 1 {
        format!("{}axis", axis)
    } else {
        format!("{}axis{}", axis, subplot)
    }
}

const ROWS: usize = 4;
const COLS: usize = 2;
const SUBPLOT_TITLES: [&str; ROWS * COLS] = [
    "Strand",
    "Clusters",
    "Prediction tool",
    "MOG number",
    "Conservation ratio",
    "Ratio histogram",
    "Length (aa)",
    "Length histogram",
];

fn subplot_index(row: usize, col: usize) -> usize {
    (row - 1) * COLS + col
}

/// Domain of a grid cell, `make_subplots` style.
fn cell_domain(row: usize, col: usize) -> ([f64; 2], [f64; 2]) {
    let w = (1.0 - HORIZONTAL_SPACING * (COLS - 1) as f64) / COLS as f64;
    let h = (1.0 - VERTICAL_SPACING * (ROWS - 1) as f64) / ROWS as f64;
    let x0 = (col - 1) as f64 * (w + HORIZONTAL_SPACING);
    let y1 = 1.0 - (row - 1) as f64 * (h + VERTICAL_SPACING);
    ([x0, x0 + w], [y1 - h, y1])
}

/// Builds the figure trace by trace.
struct FigureBuilder<'a> {
    options: &'a PlotOptions,
    data: Vec<Value>,
    scatter_indices: Vec<usize>,
    y_ranges: FxHashMap<usize, [f64; 2]>,
}

impl<'a> FigureBuilder<'a> {
    fn new(options: &'a PlotOptions) -> Self {
        Self {
            options,
            data: Vec::new(),
            scatter_indices: Vec::new(),
            y_ranges: FxHashMap::default(),
        }
    }

    fn push(&mut self, mut trace: Value, row: usize, col: usize) {
        let (xref, yref) = axis_refs(subplot_index(row, col));
        trace["xaxis"] = json!(xref);
        trace["yaxis"] = json!(yref);
        if trace["type"] == "scatter" {
            self.scatter_indices.push(self.data.len());
        }
        self.data.push(trace);
    }

    fn custom_data(points: &[&PlotPoint]) -> Vec<Value> {
        points
            .iter()
            .map(|p| json!([p.id, p.mog_number, p.mog_text]))
            .collect()
    }

    /// One scatter trace per category, in palette order.
    fn add_by_category<F>(
        &mut self,
        points: &[PlotPoint],
        key: F,
        palette: &CategoryPalette,
        row: usize,
        col: usize,
        prefix: &str,
        group: &str,
    ) where
        F: Fn(&PlotPoint) -> &str,
    {
        for (category, color) in palette.entries() {
            let subset: Vec<&PlotPoint> = points
                .iter()
                .filter(|p| key(*p) == category.as_str())
                .collect();
            if subset.is_empty() {
                continue;
            }
            let trace = json!({
                "type": "scatter",
                "mode": "markers",
                "x": subset.iter().map(|p| p.x).collect::<Vec<_>>(),
                "y": subset.iter().map(|p| p.y).collect::<Vec<_>>(),
                "marker": { "color": color, "size": self.options.marker_size, "opacity": self.options.opacity },
                "name": format!("{}{} ({})", prefix, category, subset.len()),
                "legendgroup": group,
                "legendgrouptitle": { "text": group },
                "showlegend": true,
                "customdata": Self::custom_data(&subset),
                "hovertemplate": HOVER,
            });
            self.push(trace, row, col);
        }
    }

    fn add_ratio(&mut self, points: &[PlotPoint], row: usize, col: usize) {
        let all: Vec<&PlotPoint> = points.iter().collect();
        let trace = json!({
            "type": "scatter",
            "mode": "markers",
            "x": points.iter().map(|p| p.x).collect::<Vec<_>>(),
            "y": points.iter().map(|p| p.y).collect::<Vec<_>>(),
            "marker": {
                "color": points.iter().map(|p| p.ratio).collect::<Vec<_>>(),
                "colorscale": "Viridis",
                "size": self.options.marker_size,
                "opacity": self.options.opacity,
                "showscale": false,
            },
            "showlegend": false,
            "customdata": Self::custom_data(&all),
            "hovertemplate": HOVER,
        });
        self.push(trace, row, col);
    }

    fn add_length(&mut self, points: &[PlotPoint], row: usize, col: usize) {
        let custom: Vec<Value> = points
            .iter()
            .map(|p| json!([p.id, p.mog_number, p.mog_text, p.length]))
            .collect();
        let trace = json!({
            "type": "scatter",
            "mode": "markers",
            "x": points.iter().map(|p| p.x).collect::<Vec<_>>(),
            "y": points.iter().map(|p| p.y).collect::<Vec<_>>(),
            "marker": {
                "color": points.iter().map(|p| p.length).collect::<Vec<_>>(),
                "colorscale": "Turbo",
                "size": self.options.marker_size,
                "opacity": self.options.opacity,
                "showscale": false,
            },
            "showlegend": false,
            "customdata": custom,
            "hovertemplate": HOVER_LENGTH,
        });
        self.push(trace, row, col);
    }

    /// Histogram bars plus a colour band drawn below the x axis.
    fn add_histogram(&mut self, values: &[f64], colorscale: &str, row: usize, col: usize) {
        let (counts, edges) = histogram(values, self.options.bins);
        let centers = bin_centers(&edges);
        let ymax = counts.iter().copied().max().unwrap_or(0).max(1) as f64;

        let offset = BAND_OFFSET_FRAC * ymax;
        let thickness = BAND_THICKNESS_FRAC * ymax;
        let band_top = -offset;
        let band_bottom = -(offset + thickness);

        let band = json!({
            "type": "heatmap",
            "x": centers,
            "y": [band_bottom, band_top],
            "z": [centers, centers],
            "colorscale": colorscale,
            "showscale": false,
            "hoverinfo": "skip",
            "xgap": 0,
            "ygap": 0,
        });
        self.push(band, row, col);

        let bars = json!({
            "type": "bar",
            "x": centers,
            "y": counts,
            "marker": { "color": centers, "colorscale": colorscale },
            "showlegend": false,
        });
        self.push(bars, row, col);

        self.y_ranges.insert(subplot_index(row, col), [band_bottom, ymax * 1.05]);
    }

    fn sliders(&self) -> Value {
        let n = self.scatter_indices.len();
        let size_steps: Vec<Value> = (4..=20)
            .step_by(2)
            .map(|sz| {
                json!({
                    "label": sz.to_string(),
                    "method": "restyle",
                    "args": [{ "marker.size": vec![sz; n] }, self.scatter_indices],
                })
            })
            .collect();
        let opacity_steps: Vec<Value> = (2..=10)
            .map(|tenth| {
                let op = tenth as f64 / 10.0;
                json!({
                    "label": format!("{:.1}", op),
                    "method": "restyle",
                    "args": [{ "marker.opacity": vec![op; n] }, self.scatter_indices],
                })
            })
            .collect();

        let size_active = (self.options.marker_size.clamp(4, 20) as usize - 4) / 2;
        let opacity_active = (((self.options.opacity - 0.2) / 0.1) + 1e-9).floor().clamp(0.0, 8.0) as usize;

        json!([
            {
                "active": size_active,
                "currentvalue": { "prefix": "Size: " },
                "pad": { "t": 40 },
                "steps": size_steps,
            },
            {
                "active": opacity_active,
                "currentvalue": { "prefix": "Opacity: " },
                "pad": { "t": 90 },
                "steps": opacity_steps,
            }
        ])
    }

    fn layout(&self) -> Value {
        let mut layout = json!({
            "title": { "text": self.options.title },
            "height": self.options.height,
            "margin": { "t": 40, "b": 30, "l": 30, "r": 300 },
            "dragmode": "zoom",
            "legend": {
                "x": 1.02, "xanchor": "left", "y": 0.5, "yanchor": "middle",
                "bgcolor": "rgba(255,255,255,0.65)", "bordercolor": "black", "borderwidth": 1,
                "itemsizing": "constant",
            },
            "sliders": self.sliders(),
        });

        let mut annotations = Vec::new();
        for row in 1..=ROWS {
            for col in 1..=COLS {
                let idx = subplot_index(row, col);
                let (xdomain, ydomain) = cell_domain(row, col);
                let (xref, yref) = axis_refs(idx);

                let mut yaxis = json!({ "domain": ydomain, "anchor": xref });
                if let Some(range) = self.y_ranges.get(&idx) {
                    yaxis["range"] = json!(range);
                }
                layout[layout_axis_key("x", idx)] = json!({ "domain": xdomain, "anchor": yref });
                layout[layout_axis_key("y", idx)] = yaxis;

                annotations.push(json!({
                    "text": SUBPLOT_TITLES[idx - 1],
                    "showarrow": false,
                    "xref": "paper", "yref": "paper",
                    "x": (xdomain[0] + xdomain[1]) / 2.0,
                    "y": ydomain[1],
                    "xanchor": "center", "yanchor": "bottom",
                    "font": { "size": 16 },
                }));
            }
        }
        layout["annotations"] = json!(annotations);
        layout
    }
}

/// Plotly figure (`data` + `layout`) for the joined points.
pub fn build_figure(points: &[PlotPoint], options: &PlotOptions) -> Value {
    let mut fig = FigureBuilder::new(options);

    let clusters: BTreeSet<String> = points.iter().map(|p| p.cluster.clone()).collect();
    let mogs: BTreeSet<String> = points.iter().map(|p| p.mog_number.clone()).collect();
    let tools: BTreeSet<String> = points.iter().map(|p| p.tool.clone()).collect();

    let mut tools_palette = tool_palette();
    tools_palette.extend_with(&tools);

    fig.add_by_category(points, |p| p.strand.as_str(), &strand_palette(), 1, 1, "Strand ", "Strand");
    fig.add_by_category(points, |p| p.cluster.as_str(), &CategoryPalette::generated(&clusters, false), 1, 2, "Cluster ", "Clusters");
    fig.add_by_category(points, |p| p.tool.as_str(), &tools_palette, 2, 1, "", "Prediction tool");
    fig.add_by_category(points, |p| p.mog_number.as_str(), &CategoryPalette::generated(&mogs, true), 2, 2, "MOG ", "MOG number");

    fig.add_ratio(points, 3, 1);
    fig.add_length(points, 4, 1);

    let ratios: Vec<f64> = points.iter().map(|p| p.ratio).collect();
    fig.add_histogram(&ratios, "Viridis", 3, 2);
    let lengths: Vec<f64> = points.iter().filter_map(|p| p.length).collect();
    fig.add_histogram(&lengths, "Turbo", 4, 2);

    let layout = fig.layout();
    json!({ "data": fig.data, "layout": layout })
}

// ============================================================================
// HTML Page
// ============================================================================

const PAGE_CSS: &str = r#"
  html,body{height:100%; margin:0; background:#f5f7fb;}
  .modebar{ gap:8px; }
  .modebar-btn{ padding:10px !important; }
  .modebar-btn svg{ width:28px !important; height:28px !important; }
  .map-toolbar button{ padding:10px 14px; font-size:14px; }
"#;

/// Browser-side interactions, installed once the plot exists.
const INTERACTIONS_JS: &str = r#"
function installInteractions(gd) {
  const bar = document.createElement('div');
  bar.className = 'map-toolbar';
  bar.style.cssText = 'position:sticky;top:0;display:flex;gap:8px;align-items:center;'
    + 'margin:0 0 8px 0;padding:6px 8px;border:1px solid #ddd;border-radius:8px;'
    + 'background:rgba(255,255,255,0.9);z-index:10';
  gd.parentElement.insertBefore(bar, gd);

  const button = (label) => {
    const b = document.createElement('button');
    b.textContent = label;
    bar.appendChild(b);
    return b;
  };
  const download = (blob, name) => {
    const url = URL.createObjectURL(blob);
    const a = document.createElement('a');
    a.href = url; a.download = name; a.click();
    setTimeout(() => URL.revokeObjectURL(url), 10000);
  };

  const svgButton = button('Export SVG');
  const idsButton = button('Export selected IDs');
  idsButton.disabled = true;

  svgButton.onclick = () => {
    const source = gd.querySelector('svg');
    if (!source) { alert('No SVG found'); return; }
    const svg = source.cloneNode(true);
    const wrap = (selector, prefix) => {
      svg.querySelectorAll(selector).forEach((node, i) => {
        const g = document.createElementNS(svg.namespaceURI, 'g');
        g.setAttribute('id', prefix + (i + 1));
        node.parentNode.insertBefore(g, node);
        g.appendChild(node);
      });
    };
    wrap('g.subplot', 'subplot_');
    wrap('g.legend', 'legend_');
    const text = new XMLSerializer().serializeToString(svg);
    download(new Blob([text], {type: 'image/svg+xml'}), 'embedding_map.svg');
  };

  let selected = [];
  gd.on('plotly_selected', ev => {
    if (!ev || !ev.points) { selected = []; idsButton.disabled = true; return; }
    selected = [...new Set(ev.points.map(pt => {
      const cd = gd.data[pt.curveNumber].customdata;
      return cd ? cd[pt.pointNumber][0] : null;
    }).filter(Boolean))];
    idsButton.disabled = selected.length === 0;
  });
  idsButton.onclick = () => {
    if (!selected.length) { alert('No points selected'); return; }
    download(new Blob([selected.join('\n')], {type: 'text/plain'}), 'selected_ids.txt');
  };

  gd.on('plotly_legendclick', ev => {
    const group = gd.data[ev.curveNumber].legendgroup;
    const members = gd.data.map((t, i) => t.legendgroup === group ? i : -1).filter(i => i >= 0);
    const cur = ev.curveNumber;
    const isVisible = i => gd.data[i].visible === true || gd.data[i].visible === undefined;
    if (ev.event.detail === 2) {
      const visible = members.filter(isVisible).length;
      if (visible === 1 && isVisible(cur)) {
        Plotly.restyle(gd, {visible: true}, members);
      } else {
        Plotly.restyle(gd, {visible: members.map(i => i === cur ? true : 'legendonly')}, members);
      }
      return false;
    }
    Plotly.restyle(gd, {visible: isVisible(cur) ? 'legendonly' : true}, [cur]);
    return false;
  });

  const synced = SYNCED_AXES;
  let syncing = false;
  gd.on('plotly_relayout', ev => {
    if (syncing) return;
    const pick = re => ev[Object.keys(ev).find(k => re.test(k))];
    const x0 = pick(/^xaxis\d*\.range\[0]/), x1 = pick(/^xaxis\d*\.range\[1]/);
    const y0 = pick(/^yaxis\d*\.range\[0]/), y1 = pick(/^yaxis\d*\.range\[1]/);
    if (x0 === undefined) return;
    const update = {};
    synced.forEach(n => {
      update[(n === 1 ? 'xaxis' : 'xaxis' + n) + '.range'] = [x0, x1];
      update[(n === 1 ? 'yaxis' : 'yaxis' + n) + '.range'] = [y0, y1];
    });
    syncing = true;
    Plotly.relayout(gd, update).then(() => { syncing = false; });
  });
}
"#;

/// Scatter panels whose zoom is kept in sync.
fn synced_subplots() -> Vec<usize> {
    vec![
        subplot_index(1, 1),
        subplot_index(1, 2),
        subplot_index(2, 1),
        subplot_index(2, 2),
        subplot_index(3, 1),
        subplot_index(4, 1),
    ]
}

/// JSON made safe for inlining in a `<script>` element.
fn script_json(value: &Value) -> String {
    value.to_string().replace("</", "<\\/")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders the complete HTML page.
pub fn render_html(figure: &Value, options: &PlotOptions) -> String {
    let config = json!({
        "displaylogo": false,
        "responsive": true,
        "modeBarButtonsToAdd": ["lasso2d", "select2d"],
    });
    let synced = json!(synced_subplots()).to_string();
    let interactions = INTERACTIONS_JS.replace("SYNCED_AXES", &synced);

    format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'><title>{title}</title>\
         <script src=\"{src}\"></script><style>{css}</style></head><body>\
         <div id=\"plotly-graph\"></div>\
         <script>{interactions}\
         const figure = {figure};\n\
         Plotly.newPlot('plotly-graph', figure.data, figure.layout, {config})\
         .then(gd => installInteractions(gd));\n\
         </script></body></html>\n",
        title = escape_html(&options.title),
        src = escape_html(&options.plotly_src),
        css = PAGE_CSS,
        interactions = interactions,
        figure = script_json(figure),
        config = config,
    )
}

/// Joins coordinates and annotations, then writes the HTML page.
pub fn write_plot<P: AsRef<Path>>(
    path: P,
    coords: &[Coordinate],
    table: &AnnotationTable,
    options: &PlotOptions,
) -> Result<usize> {
    let path = path.as_ref();
    let points = join_points(coords, table);
    let unannotated = points.iter().filter(|p| table.resolve(&p.id).is_none()).count();
    if unannotated > 0 {
        log::warn!("{} points have no annotation row", unannotated);
    }

    let figure = build_figure(&points, options);
    let html = render_html(&figure, options);
    std::fs::write(path, html).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(points.len())
}
