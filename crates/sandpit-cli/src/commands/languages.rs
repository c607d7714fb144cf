use sandpit_runtime::LanguageTable;

pub fn execute() {
    let table = LanguageTable::builtin();

    println!("Languages:");
    for spec in table.iter() {
        let stages = match &spec.compile {
            Some(compile) => format!("{} -> {}", compile.program, spec.run.program),
            None => spec.run.program.clone(),
        };
        if spec.aliases.is_empty() {
            println!("  - {} ({}) [{}]", spec.id, spec.display_name, stages);
        } else {
            println!(
                "  - {} ({}) [{}] aliases: {}",
                spec.id,
                spec.display_name,
                stages,
                spec.aliases.join(", ")
            );
        }
    }
}
