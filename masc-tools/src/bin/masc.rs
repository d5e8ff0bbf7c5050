#![warn(clippy::all)]

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::info;
use masc_algorithms::{
    classifier::{load_classifier, save_classifier, RandomForest, TrainingParameters},
    core_points::{CorePoints, SubsamplingMethod},
    features::{CloudRef, FeatureDescriptor},
    ledger::FieldLedger,
    pipeline::{Pipeline, PipelineConfig},
    progress::LogProgress,
};
use masc_core::cloud::CloudStore;
use masc_tools::{
    ascii::{read_ascii_file, write_ascii_file},
    feature_list::{parse_feature_list, parse_scales},
};

const CLOUD_LABEL: &str = "PC1";
const OUTPUT_PRECISION: usize = 6;

fn input_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("INPUT")
        .short("i")
        .long("input")
        .takes_value(true)
        .value_name("INPUT")
        .help("Input point cloud in ASCII format with a header line")
        .required(true)
}

fn feature_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("FEATURES")
            .short("f")
            .long("features")
            .takes_value(true)
            .value_name("FEATURES")
            .help("Comma-separated features, e.g. PCA1,PLANA,ROUGH,INT:MEAN,Z")
            .required(true),
        Arg::with_name("SCALES")
            .short("s")
            .long("scales")
            .takes_value(true)
            .value_name("SCALES")
            .help("Comma-separated neighborhood diameters, e.g. 0.5,1,2")
            .default_value("1"),
        Arg::with_name("THREADS")
            .long("threads")
            .takes_value(true)
            .value_name("THREADS")
            .help("Number of worker threads, 0 for one per core")
            .default_value("0"),
        Arg::with_name("KEEP_FIELD")
            .long("keep-field")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .value_name("FIELD")
            .help("Feature field to keep on the cloud, can be repeated"),
    ]
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    matches
        .value_of(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| anyhow!("Invalid value '{}' for argument {}", value, name))
        })
        .transpose()
}

fn required_path(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .value_of(name)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Missing argument {}", name))
}

/// Reads the input cloud into a new store and builds the feature descriptors on it
fn load_input(matches: &ArgMatches) -> Result<(CloudStore, CloudRef, Vec<FeatureDescriptor>)> {
    let input = required_path(matches, "INPUT")?;
    let cloud = read_ascii_file(&input)?;
    info!("Read {} points from {}", cloud.len(), input.display());

    let scales = parse_scales(matches.value_of("SCALES").unwrap_or("1"))?;
    let mut store = CloudStore::new();
    let pc1 = CloudRef::new(store.insert(cloud), CLOUD_LABEL);
    let descriptors = parse_feature_list(
        matches.value_of("FEATURES").unwrap_or_default(),
        &scales,
        &pc1,
    )?;
    Ok((store, pc1, descriptors))
}

fn pipeline_config(matches: &ArgMatches) -> Result<PipelineConfig> {
    let defaults = TrainingParameters::default();
    Ok(PipelineConfig {
        keep_intermediate_fields: matches.is_present("KEEP"),
        keep_fields: matches
            .values_of("KEEP_FIELD")
            .map(|names| names.map(String::from).collect())
            .unwrap_or_default(),
        test_ratio: parse_arg(matches, "TEST_RATIO")?,
        seed: parse_arg(matches, "SEED")?,
        num_threads: parse_arg(matches, "THREADS")?.unwrap_or(0),
        training: TrainingParameters {
            max_depth: parse_arg(matches, "MAX_DEPTH")?.unwrap_or(defaults.max_depth),
            min_sample_count: parse_arg(matches, "MIN_SAMPLES")?
                .unwrap_or(defaults.min_sample_count),
            max_tree_count: parse_arg(matches, "TREES")?.unwrap_or(defaults.max_tree_count),
            active_var_count: parse_arg(matches, "ACTIVE_VARS")?
                .unwrap_or(defaults.active_var_count),
            compute_var_importance: true,
        },
    })
}

fn run_features(matches: &ArgMatches) -> Result<()> {
    let (mut store, pc1, mut descriptors) = load_input(matches)?;
    let output = required_path(matches, "OUTPUT")?;
    let method = match parse_arg::<f64>(matches, "SPACING")? {
        Some(min_spacing) => SubsamplingMethod::Spatial { min_spacing },
        None => SubsamplingMethod::None,
    };
    let mut core = CorePoints::new(pc1.id, method);
    let mut ledger = FieldLedger::new();
    let pipeline = Pipeline::new(pipeline_config(matches)?)?;
    let sources = pipeline
        .compute_features(
            &mut descriptors,
            &mut store,
            &mut core,
            &mut ledger,
            &LogProgress::default(),
        )
        .context("Feature computation failed")?;
    for source in &sources {
        info!("Computed {}", source.label());
    }

    let core_cloud = core
        .cloud()
        .ok_or_else(|| anyhow!("Core points were not prepared"))?;
    write_ascii_file(store.cloud(core_cloud), &output, OUTPUT_PRECISION)?;
    info!("Wrote {}", output.display());
    Ok(())
}

fn run_train(matches: &ArgMatches) -> Result<()> {
    let (mut store, pc1, mut descriptors) = load_input(matches)?;
    let model_path = required_path(matches, "MODEL")?;
    let config = pipeline_config(matches)?;
    let mut forest = match config.seed {
        Some(seed) => RandomForest::new().with_seed(seed),
        None => RandomForest::new(),
    };
    let pipeline = Pipeline::new(config)?;
    let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
    let report = pipeline
        .train(
            &mut descriptors,
            &mut forest,
            &mut store,
            &mut core,
            &LogProgress::default(),
        )
        .context("Training failed")?;

    info!("Trained on {} points", report.training_points);
    if let Some(evaluation) = &report.evaluation {
        println!(
            "Correct guesses: {}/{} ({:.2}%)",
            evaluation.correct,
            evaluation.sample_count,
            evaluation.ratio * 100.0
        );
        println!("{}", evaluation.confusion);
    }
    if let Some(importance) = &report.importance {
        println!("Variable importance");
        for (name, value) in importance {
            println!("\t{:<32}{:.4}", name, value);
        }
    }
    let sources_path = save_classifier(&forest, &report.sources, &model_path)?;
    println!(
        "Saved classifier to {} ({})",
        model_path.display(),
        sources_path.display()
    );
    Ok(())
}

fn run_classify(matches: &ArgMatches) -> Result<()> {
    let (mut store, pc1, mut descriptors) = load_input(matches)?;
    let model_path = required_path(matches, "MODEL")?;
    let output = required_path(matches, "OUTPUT")?;
    let (forest, sources) = load_classifier(&model_path)
        .with_context(|| format!("Could not load classifier {}", model_path.display()))?;

    let pipeline = Pipeline::new(pipeline_config(matches)?)?;
    let mut core = CorePoints::new(pc1.id, SubsamplingMethod::None);
    let fields = pipeline
        .classify(
            &mut descriptors,
            &forest,
            &sources,
            &mut store,
            &mut core,
            &LogProgress::default(),
        )
        .context("Classification failed")?;
    if fields.previous.is_some() {
        info!("Kept the previous labels in Classification_prev");
    }
    write_ascii_file(store.cloud(pc1.id), &output, OUTPUT_PRECISION)?;
    info!("Wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let output_arg = Arg::with_name("OUTPUT")
        .short("o")
        .long("output")
        .takes_value(true)
        .value_name("OUTPUT")
        .help("Output point cloud in ASCII format")
        .required(true);
    let model_arg = Arg::with_name("MODEL")
        .short("m")
        .long("model")
        .takes_value(true)
        .value_name("MODEL")
        .help("Classifier file. The feature sources are stored next to it")
        .required(true);

    let matches = App::new("masc")
        .version("0.1")
        .about("Multi-scale feature extraction and random forest classification of point clouds")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("features")
                .about("Computes features and writes them as scalar fields")
                .arg(input_arg())
                .arg(output_arg.clone())
                .args(&feature_args())
                .arg(
                    Arg::with_name("SPACING")
                        .long("spacing")
                        .takes_value(true)
                        .value_name("SPACING")
                        .help("Minimum distance between core points. All points are core points if omitted"),
                ),
        )
        .subcommand(
            SubCommand::with_name("train")
                .about("Trains a classifier on the Classification field of the input cloud")
                .arg(input_arg())
                .arg(model_arg.clone())
                .args(&feature_args())
                .arg(
                    Arg::with_name("TEST_RATIO")
                        .long("test-ratio")
                        .takes_value(true)
                        .value_name("RATIO")
                        .help("Share of the points held back to evaluate the classifier"),
                )
                .arg(Arg::with_name("TREES").long("trees").takes_value(true).help("Maximum number of trees"))
                .arg(Arg::with_name("MAX_DEPTH").long("max-depth").takes_value(true).help("Maximum tree depth"))
                .arg(
                    Arg::with_name("MIN_SAMPLES")
                        .long("min-samples")
                        .takes_value(true)
                        .help("Minimum number of samples to split a node"),
                )
                .arg(
                    Arg::with_name("ACTIVE_VARS")
                        .long("active-vars")
                        .takes_value(true)
                        .help("Features considered per split, 0 for the square root of the feature count"),
                )
                .arg(Arg::with_name("SEED").long("seed").takes_value(true).help("Seed for reproducible runs"))
                .arg(
                    Arg::with_name("KEEP")
                        .long("keep")
                        .help("Keep the feature fields on the cloud"),
                ),
        )
        .subcommand(
            SubCommand::with_name("classify")
                .about("Classifies the input cloud with a trained classifier")
                .arg(input_arg())
                .arg(output_arg)
                .arg(model_arg)
                .args(&feature_args())
                .arg(
                    Arg::with_name("KEEP")
                        .long("keep")
                        .help("Keep the feature fields on the cloud"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("features", Some(sub_matches)) => run_features(sub_matches),
        ("train", Some(sub_matches)) => run_train(sub_matches),
        ("classify", Some(sub_matches)) => run_classify(sub_matches),
        _ => Err(anyhow!("Unknown subcommand")),
    }
}
