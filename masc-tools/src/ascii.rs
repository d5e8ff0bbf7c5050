use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use masc_core::{cloud::PointCloud, nalgebra::Vector3};

/// Meaning of one column of an ASCII point cloud file
#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    CoordinateX,
    CoordinateY,
    CoordinateZ,
    ColorR,
    ColorG,
    ColorB,
    NormalX,
    NormalY,
    NormalZ,
    /// Index into the scalar fields of the file
    Field(usize),
}

impl Column {
    fn from_header(name: &str, next_field: usize) -> Column {
        match name.to_ascii_uppercase().as_str() {
            "X" => Column::CoordinateX,
            "Y" => Column::CoordinateY,
            "Z" => Column::CoordinateZ,
            "R" | "RED" => Column::ColorR,
            "G" | "GREEN" => Column::ColorG,
            "B" | "BLUE" => Column::ColorB,
            "NX" => Column::NormalX,
            "NY" => Column::NormalY,
            "NZ" => Column::NormalZ,
            _ => Column::Field(next_field),
        }
    }
}

/// Splits a line at whitespace, commas and semicolons
fn split_line(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|token| !token.is_empty())
}

fn parse_value<V: std::str::FromStr>(token: &str) -> Result<V> {
    token.parse::<V>().map_err(|_| {
        anyhow::anyhow!(
            "ParseError expected {} found '{}'.",
            std::any::type_name::<V>(),
            token
        )
    })
}

/// Reads a point cloud from ASCII text. The first line names the columns and may start with `//`. `X`, `Y` and `Z`
/// are required, `R G B` are read as colors and `Nx Ny Nz` as normals. Every other column becomes a scalar field
pub fn read_ascii<R: BufRead>(reader: R, name: &str) -> Result<PointCloud> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(header) => header?,
        None => bail!("ASCII point cloud has no header line"),
    };
    let header = header.trim_start_matches("//");

    let mut field_names = vec![];
    let columns = split_line(header)
        .map(|column| {
            let parsed = Column::from_header(column, field_names.len());
            if let Column::Field(_) = parsed {
                field_names.push(column.to_owned());
            }
            parsed
        })
        .collect::<Vec<_>>();
    for required in [Column::CoordinateX, Column::CoordinateY, Column::CoordinateZ].iter() {
        if !columns.contains(required) {
            bail!("ASCII header '{}' has no {:?} column", header, required);
        }
    }
    let has_colors = [Column::ColorR, Column::ColorG, Column::ColorB]
        .iter()
        .all(|column| columns.contains(column));
    let has_normals = [Column::NormalX, Column::NormalY, Column::NormalZ]
        .iter()
        .all(|column| columns.contains(column));

    let mut positions = vec![];
    let mut colors = vec![];
    let mut normals = vec![];
    let mut fields = vec![vec![]; field_names.len()];
    for (line_number, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut position = Vector3::zeros();
        let mut color = Vector3::zeros();
        let mut normal = Vector3::zeros();
        let mut token_count = 0;
        for (token, column) in split_line(&line).zip(&columns) {
            token_count += 1;
            let context = || format!("Invalid {:?} value in line {}", column, line_number + 2);
            match column {
                Column::CoordinateX => position.x = parse_value(token).with_context(context)?,
                Column::CoordinateY => position.y = parse_value(token).with_context(context)?,
                Column::CoordinateZ => position.z = parse_value(token).with_context(context)?,
                Column::ColorR => color.x = parse_value(token).with_context(context)?,
                Column::ColorG => color.y = parse_value(token).with_context(context)?,
                Column::ColorB => color.z = parse_value(token).with_context(context)?,
                Column::NormalX => normal.x = parse_value(token).with_context(context)?,
                Column::NormalY => normal.y = parse_value(token).with_context(context)?,
                Column::NormalZ => normal.z = parse_value(token).with_context(context)?,
                Column::Field(index) => {
                    fields[*index].push(parse_value::<f64>(token).with_context(context)?)
                }
            }
        }
        if token_count < columns.len() {
            bail!(
                "Line {} has {} values, expected {}",
                line_number + 2,
                token_count,
                columns.len()
            );
        }
        positions.push(position);
        colors.push(color);
        normals.push(normal);
    }

    let mut cloud = PointCloud::from_positions(name, positions);
    if has_colors {
        cloud.set_colors(colors);
    }
    if has_normals {
        cloud.set_normals(normals);
    }
    for (field_name, values) in field_names.into_iter().zip(fields) {
        if cloud.add_field_with_values(field_name.as_str(), values).is_none() {
            bail!("Duplicate column '{}'", field_name);
        }
    }
    Ok(cloud)
}

/// Reads an ASCII point cloud file, see [`read_ascii`]. The cloud is named after the file
pub fn read_ascii_file<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cloud".into());
    read_ascii(BufReader::new(file), &name)
        .with_context(|| format!("Could not read point cloud {}", path.display()))
}

/// Writes `cloud` as ASCII text with a header line, in the format [`read_ascii`] reads. Coordinates, normals and
/// scalar fields are written with `precision` decimal places
pub fn write_ascii<W: Write>(cloud: &PointCloud, writer: W, precision: usize) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    let mut header = vec!["X".to_owned(), "Y".to_owned(), "Z".to_owned()];
    if cloud.has_colors() {
        header.extend(["R", "G", "B"].iter().map(|name| name.to_string()));
    }
    if cloud.has_normals() {
        header.extend(["Nx", "Ny", "Nz"].iter().map(|name| name.to_string()));
    }
    for field in cloud.fields() {
        if field.name().contains(|c: char| c.is_whitespace() || c == ',' || c == ';') {
            bail!("Scalar field name '{}' can't be written as a column", field.name());
        }
        header.push(field.name().to_owned());
    }
    writeln!(writer, "//{}", header.join(" "))?;

    for (index, position) in cloud.positions().iter().enumerate() {
        write!(
            writer,
            "{:.prec$} {:.prec$} {:.prec$}",
            position.x,
            position.y,
            position.z,
            prec = precision
        )?;
        if let Some(colors) = cloud.colors() {
            let color = colors[index];
            write!(writer, " {} {} {}", color.x, color.y, color.z)?;
        }
        if let Some(normals) = cloud.normals() {
            let normal = normals[index];
            write!(
                writer,
                " {:.prec$} {:.prec$} {:.prec$}",
                normal.x,
                normal.y,
                normal.z,
                prec = precision
            )?;
        }
        for field in cloud.fields() {
            write!(writer, " {:.prec$}", field.value(index), prec = precision)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_ascii_file<P: AsRef<Path>>(cloud: &PointCloud, path: P, precision: usize) -> Result<()> {
    let path = path.as_ref();
    let file =
        File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    write_ascii(cloud, file, precision)
}
