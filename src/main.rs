use clap::{App, Arg};
use genedp::dynprog::{BestPath, DecodeConfig, DynProg, ScoringTerms};
use genedp::error::DecodeError;
use genedp::gen_seq;
use genedp::plif::PenaltyMatrix;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
#[macro_use]
extern crate log;

fn main() {
    let matches = App::new("genedp")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Benchmark N-best decoding on random gene models.")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Debug mode"),
        )
        .arg(
            Arg::with_name("states")
                .long("states")
                .takes_value(true)
                .default_value(&"20")
                .help("Number of states"),
        )
        .arg(
            Arg::with_name("length")
                .long("length")
                .takes_value(true)
                .default_value(&"1000")
                .help("Number of breakpoints of each sequence"),
        )
        .arg(
            Arg::with_name("nbest")
                .long("nbest")
                .takes_value(true)
                .default_value(&"3")
                .help("Number of paths to report"),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .takes_value(true)
                .default_value(&"32389")
                .help("Seed"),
        )
        .arg(
            Arg::with_name("sequences")
                .long("sequences")
                .takes_value(true)
                .default_value(&"8")
                .help("Number of sequences to decode"),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .short("t")
                .takes_value(true)
                .default_value(&"1")
                .help("Number of threads"),
        )
        .arg(
            Arg::with_name("orf")
                .long("orf")
                .help("Reject segments with in-frame stop codons"),
        )
        .get_matches();
    let level = match matches.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let parse = |name: &str| -> usize {
        matches
            .value_of(name)
            .and_then(|e| e.parse().ok())
            .unwrap()
    };
    let (states, length, nbest) = (parse("states"), parse("length"), parse("nbest"));
    let (sequences, threads) = (parse("sequences"), parse("threads"));
    let seed = parse("seed") as u64;
    let use_orf = matches.is_present("orf");
    if let Err(why) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        debug!("{:?} The global thread pool is already set up.", why);
    }
    let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
    let model = gen_seq::random_model(&mut rng, states, 0.3);
    let mut plifs = vec![];
    let mut ids = vec![];
    for from in 0..states {
        for edge in model.forward(from) {
            let max_len = rng.gen_range(10..100);
            ids.push((from, edge.state(), plifs.len()));
            plifs.push(gen_seq::random_length_plif(&mut rng, max_len));
        }
    }
    let mut penalties = PenaltyMatrix::new(states, plifs);
    for (from, to, id) in ids {
        if let Err(why) = penalties.set_transition_penalty(from, to, vec![id]) {
            error!("{}", why);
            std::process::exit(1);
        }
    }
    // With every state in frame 0, each segment is a candidate open reading frame.
    let orf_info = vec![0i64; 2 * states];
    let seeds: Vec<u64> = (0..sequences).map(|_| rng.gen()).collect();
    info!("MODEL\t{}\t{}\t{}", states, model.num_edges(), penalties.max_len().unwrap_or(0));
    let start = std::time::Instant::now();
    let results: Vec<_> = seeds
        .par_iter()
        .map(|&seed| -> Result<Vec<BestPath>, DecodeError> {
            let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
            let scale = if use_orf { 3 } else { 1 };
            let positions: Vec<_> = gen_seq::random_positions(&mut rng, length, 10)
                .iter()
                .map(|x| x * scale)
                .collect();
            let genestr = gen_seq::generate_seq(&mut rng, positions.last().map_or(0, |x| x + 1));
            let obs = gen_seq::random_observations(&mut rng, states, length, 0.01);
            let mut dp = DynProg::new(&model);
            dp.set_config(DecodeConfig::new(ScoringTerms::trans()));
            dp.set_observations(&obs, states, length)?;
            dp.set_positions(&positions)?;
            dp.set_penalties(&penalties)?;
            dp.set_genestr(&genestr);
            if use_orf {
                dp.set_orf_info(&orf_info, states, 2)?;
            }
            dp.decode(nbest, use_orf)?;
            Ok(dp.paths().to_vec())
        })
        .collect();
    info!("TIME\t{}", start.elapsed().as_millis());
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(paths) => {
                for (rank, path) in paths.iter().enumerate() {
                    println!("{}\t{}\t{:.3}\t{}", i, rank, path.score, path.len());
                }
            }
            Err(why) => error!("{}\t{}", i, why),
        }
    }
}
