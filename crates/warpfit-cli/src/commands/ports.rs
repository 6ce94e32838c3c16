use warpgrid_fit::parse_port_ranges;

pub fn ports(spec: &str) -> anyhow::Result<()> {
    let ports = parse_port_ranges(spec)?;
    let rendered: Vec<String> = ports.iter().map(u16::to_string).collect();
    println!("{}", rendered.join(","));
    Ok(())
}
