use ctxcfb::{
    config::Config,
    crypto::{Decryptor, EncryptionMode, Encryptor},
    CompoundFile, Error,
};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use tracing_subscriber::prelude::*;

fn usage(me: &str) -> ! {
    eprintln!("Usage:");
    eprintln!("{} <cfbfile>", me);
    eprintln!("  Lists all entries in <cfbfile>");
    eprintln!("{} <cfbfile> <entry>", me);
    eprintln!("  Prints the details of the <entry> in <cfbfile>");
    eprintln!("{} <cfbfile> <stream> <output>", me);
    eprintln!("  Extracts <stream> from <cfbfile> and writes it to <output>");
    eprintln!("{} <cfbfile> --test", me);
    eprintln!("  Tests all streams in <cfbfile>");
    eprintln!("{} <cfbfile> --decrypt", me);
    eprintln!("  Prints encryption information from <cfbfile>");
    eprintln!("{} <cfbfile> --decrypt <password> <output>", me);
    eprintln!("  Decrypts encrypted <cfbfile> with <password> into <output>");
    eprintln!("{} <input> --encrypt <password> <cfbfile>", me);
    eprintln!("  Encrypts <input> with <password> into a new <cfbfile>");
    eprintln!("  (settings are read from ctxcfb.toml and CTXCFB__* variables)");
    std::process::exit(1);
}

fn output(to: &str) -> Result<Box<dyn Write>, io::Error> {
    Ok(match to {
        "-" => Box::new(io::stdout()),
        _ => Box::new(File::create(to).map_err(|e| {
            eprintln!("Failed to create output file: {e}");
            e
        })?),
    })
}

fn encrypt(input: &str, password: &str, to: &str) -> Result<(), Error> {
    let config = Config::new()?;
    let mut encryptor = Encryptor::new(config.encryption_info()?);
    encryptor.confirm_password(password)?;
    let mut cf = CompoundFile::new(config.cfb_version());
    let reader: Box<dyn Read> = match input {
        "-" => Box::new(io::stdin()),
        _ => Box::new(BufReader::new(File::open(input)?)),
    };
    let size = encryptor.encrypt(&mut cf, reader)?;
    eprintln!(
        "Encrypted {size} bytes ({} {})",
        encryptor.info().mode(),
        encryptor.info().cipher()
    );
    cf.save_to_path(to)
}

fn main() -> Result<(), io::Error> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if !(2..=5).contains(&args.len()) {
        usage(&args[0]);
    }

    if args.len() == 5 && args[2] == "--encrypt" {
        return encrypt(&args[1], &args[3], &args[4]).map_err(|e| {
            eprintln!("Encryption failed: {e}");
            e.into()
        });
    }

    let docfname = &args[1];
    let f = File::open(docfname).map_err(|e| {
        eprintln!("Failed to open {}: {}", &docfname, e);
        e
    })?;
    let cf = CompoundFile::open(BufReader::new(f)).map_err(|e| {
        eprintln!("CompoundFile::open failed: {}", e);
        io::Error::from(e)
    })?;

    if args.len() == 2 {
        for (name, entry) in cf.ftw()? {
            let kind = if entry.is_storage() {
                "storage"
            } else {
                "stream"
            };
            println!("[{}] {:?}", kind, name);
        }
    } else if args.len() == 3 && args[2] == "--test" {
        let anomalies = cf.anomalies();
        if !anomalies.is_empty() {
            eprintln!("Warning: the following defects were encountered");
            for an in anomalies {
                eprintln!("  - {}", an);
            }
        }
        let mut exit_code = 0;
        for (name, entry) in cf.ftw()? {
            if entry.is_stream() {
                match cf.get_stream(&name).and_then(|h| cf.read_stream(h)) {
                    Ok(data) if data.len() as u64 == entry.size => eprintln!("{name}: OK"),
                    Ok(data) => {
                        exit_code = 1;
                        eprintln!("{name}: {} bytes read, {} expected", data.len(), entry.size);
                    }
                    Err(e) => {
                        exit_code = 1;
                        eprintln!("{name}: {e}");
                    }
                }
            } else {
                eprintln!("{name}/: OK");
            }
            let anomalies = entry.anomalies.as_slice();
            if !anomalies.is_empty() {
                eprintln!("  Warning: the following Entry defects were encountered");
                for an in anomalies {
                    eprintln!("    - {}", an);
                }
            }
        }
        std::process::exit(exit_code);
    } else if [3, 5].contains(&args.len()) && args[2] == "--decrypt" {
        let mut decryptor = Decryptor::new(&cf).map_err(|e| {
            eprintln!("Encryption not present or not supported: {e}");
            io::Error::from(e)
        })?;
        if args.len() == 3 {
            eprintln!("{:#?}", decryptor);
        } else if decryptor.verify_password(&args[3]) {
            if let Some(key) = decryptor.key() {
                eprintln!("Password ok! Key {key:x}");
            }
            let writer = output(&args[4])?;
            decryptor.decrypt(&cf, writer).map_err(|e| {
                eprintln!("Failed to write output file: {e}");
                io::Error::from(e)
            })?;
            if decryptor.info().mode() == EncryptionMode::Agile {
                if let Err(e) = decryptor.verify_integrity(&cf) {
                    eprintln!("Warning: {e}");
                }
            }
        } else {
            eprintln!("Wrong password");
        }
    } else {
        let entry = match cf.get_entry(&args[2]) {
            Ok(v) => v,
            Err(e) => {
                match e {
                    Error::EntryNotFound(_) => {
                        eprintln!("The requested entry could not be found")
                    }
                    Error::Format(_) | Error::CorruptChain(_) => {
                        eprintln!("A parse problem was encountered: {}", e)
                    }
                    _ => {
                        eprintln!("An error occurred: {}", e);
                    }
                }
                return Err(e.into());
            }
        };
        if args.len() == 3 {
            println!("Details for {}:", entry.name);
            println!("{:#?}", entry);
        } else {
            let data = cf
                .get_stream(&args[2])
                .and_then(|h| cf.read_stream(h))
                .map_err(|e| {
                    eprintln!("An error occurred: {}", e);
                    io::Error::from(e)
                })?;
            output(&args[3])?.write_all(&data)?;
        }
    }
    Ok(())
}
